//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use chrono::{DateTime, FixedOffset, TimeZone};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use qcloud_scheduler::api::models::{
    ErrorDetail, ExecutionResultVersion, ExecutionStatus, ExecutionTimestamps, Job,
    JobExecutionSettings, ReportExecutionResultRequest, SubmitJobOptions, SubmitJobRequest,
    UploadedResult,
};
use qcloud_scheduler::clock::jst;
use qcloud_scheduler::stores::{
    BlobStore, JobTable, MemoryBlobStore, MemoryJobTable, TokenInfo,
};
use qcloud_scheduler::{
    JobManager, JobManagerConfig, JobRepository, ManualClock, PriorityConfig, StateSavePolicy,
};

pub const QUEUE_CAPACITY: usize = 100 * 1024 * 1024;

pub fn t0() -> DateTime<FixedOffset> {
    jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap()
}

pub struct SchedulerFixture {
    pub clock: Arc<ManualClock>,
    pub table: Arc<MemoryJobTable>,
    pub blob_store: Arc<MemoryBlobStore>,
    pub manager: Arc<JobManager>,
}

pub async fn build_manager(
    clock: &Arc<ManualClock>,
    table: &Arc<MemoryJobTable>,
    blob_store: &Arc<MemoryBlobStore>,
    capacity_bytes: usize,
) -> JobManager {
    let repository = JobRepository::new(
        Arc::clone(blob_store) as Arc<dyn BlobStore>,
        Arc::clone(clock) as Arc<dyn qcloud_scheduler::Clock>,
    );
    JobManager::new(
        JobManagerConfig {
            queue_capacity_bytes: capacity_bytes,
            max_concurrent_jobs_per_token: HashMap::from([
                ("admin".to_string(), 1000),
                ("developer".to_string(), 10),
                ("guest".to_string(), 5),
            ]),
            supported_backends: BTreeSet::from(["qpu".to_string(), "emulator".to_string()]),
            unify_backends: false,
            priority_config: PriorityConfig::default(),
        },
        Arc::clone(table) as Arc<dyn JobTable>,
        repository,
        Arc::clone(clock) as Arc<dyn qcloud_scheduler::Clock>,
    )
    .await
    .unwrap()
}

pub async fn scheduler_fixture() -> SchedulerFixture {
    scheduler_fixture_with_capacity(QUEUE_CAPACITY).await
}

pub async fn scheduler_fixture_with_capacity(capacity_bytes: usize) -> SchedulerFixture {
    let clock = Arc::new(ManualClock::new(t0()));
    let table = Arc::new(MemoryJobTable::new());
    let blob_store = Arc::new(MemoryBlobStore::new());
    let manager = Arc::new(build_manager(&clock, &table, &blob_store, capacity_bytes).await);
    SchedulerFixture {
        clock,
        table,
        blob_store,
        manager,
    }
}

pub fn token_info(role: &str) -> TokenInfo {
    TokenInfo {
        role: role.to_string(),
        name: format!("{role}-user"),
        expires_at: None,
    }
}

pub fn submit_request(backend: &str, timeout_s: u64, token: &str) -> SubmitJobRequest {
    SubmitJobRequest {
        token: token.to_string(),
        job: Job {
            program: b"quantum program".to_vec(),
            settings: JobExecutionSettings {
                backend: backend.to_string(),
                n_shots: 100,
                timeout_s,
                state_save_policy: StateSavePolicy::All,
                resource_squeezing_level: 0.0,
                role: String::new(),
            },
        },
        options: SubmitJobOptions { save_job: true },
        sdk_version: "1.0.0".to_string(),
    }
}

pub fn success_report(job_id: &str) -> ReportExecutionResultRequest {
    ReportExecutionResultRequest {
        job_id: job_id.to_string(),
        status: ExecutionStatus::Success,
        error: ErrorDetail::default(),
        timestamps: ExecutionTimestamps {
            compile_started_at: Some(t0()),
            compile_finished_at: Some(t0()),
            execution_started_at: Some(t0()),
            execution_finished_at: Some(t0()),
        },
        uploaded_result: UploadedResult {
            raw_size_bytes: 4096,
            encoded_size_bytes: 1024,
        },
        actual_backend: "emulator-1".to_string(),
        version: ExecutionResultVersion {
            physical_lab: "lab-2.0".to_string(),
            quantum_computer: "qc-7".to_string(),
            simulator: "sim-3.1".to_string(),
        },
    }
}

/// Key of the result object the executor uploads for a job.
pub fn result_key(job_id: &str) -> String {
    format!("{job_id}.out.proto.gz")
}
