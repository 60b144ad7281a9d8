//! Job state machine and manager.
//!
//! The manager owns the per-backend queues and keeps the durable table
//! consistent with them: submit pushes, dispatch pops and marks RUNNING,
//! finalize writes the terminal record, cancel removes from the queue.
//! On startup it re-enqueues QUEUED records and declares RUNNING records
//! lost.
//!
//! Every mutating operation acquires the queue-container mutex once at
//! its top; helpers never lock, so separate RPCs serialize through the
//! manager without re-entrancy.

use chrono::{DateTime, Duration, FixedOffset};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::models::{
    AssignNextJobRequest, AssignNextJobResponse, ErrorDetail, ExecutionStatus, Job,
    JobExecutionSettings, JobResultUploadTarget, ReportExecutionResultRequest,
    ReportExecutionResultResponse, SubmitJobRequest,
};
use crate::clock::SharedClock;
use crate::error::{SchedulerError, SchedulerResult};
use crate::job::metadata::{
    datetime_attr, opt_datetime_attr, JobMetadata, JobMetadataInit, JobStatus,
};
use crate::messages::{get_status_message, StatusMessage};
use crate::priority::PriorityConfig;
use crate::queue::{JobQueueContainer, QueueSettings};
use crate::repository::JobRepository;
use crate::stores::table::{AttrValue, JobTable, TableItem};
use crate::stores::tokens::TokenInfo;

/// Construction parameters of the job manager.
pub struct JobManagerConfig {
    /// Capacity of each job queue in bytes.
    pub queue_capacity_bytes: usize,
    /// Role to the maximum number of concurrent jobs per token.
    pub max_concurrent_jobs_per_token: HashMap<String, usize>,
    /// Set of all supported backends.
    pub supported_backends: BTreeSet<String>,
    /// Whether to merge backends when scheduling jobs.
    pub unify_backends: bool,
    /// Priority weights and burst policy shared by all queues.
    pub priority_config: PriorityConfig,
}

/// Job manager.
pub struct JobManager {
    queues: Mutex<JobQueueContainer>,
    table: Arc<dyn JobTable>,
    repository: JobRepository,
    clock: SharedClock,
}

fn set_failed(job_metadata: &mut JobMetadata, status_message: &StatusMessage) {
    job_metadata.status = JobStatus::Failed;
    job_metadata.status_code = status_message.code.clone();
    job_metadata.status_message = status_message.message.clone();
}

fn status_updates(status: JobStatus) -> TableItem {
    let mut updates = TableItem::new();
    updates.insert(
        "status".to_string(),
        AttrValue::S(status.as_str().to_string()),
    );
    updates
}

fn assign_error(status_message: StatusMessage) -> AssignNextJobResponse {
    AssignNextJobResponse {
        error: Some(ErrorDetail::from(status_message)),
        ..Default::default()
    }
}

fn report_error(status_message: StatusMessage) -> ReportExecutionResultResponse {
    ReportExecutionResultResponse {
        error: Some(ErrorDetail::from(status_message)),
    }
}

impl JobManager {
    /// Build the manager, verify the durable table, and recover state.
    ///
    /// QUEUED records are re-enqueued with their persisted `queued_at` so
    /// they keep their fairness position; RUNNING records cannot know how
    /// far the lab got, so they are declared FAILED and their owners can
    /// resubmit.
    pub async fn new(
        config: JobManagerConfig,
        table: Arc<dyn JobTable>,
        repository: JobRepository,
        clock: SharedClock,
    ) -> SchedulerResult<Self> {
        table
            .ensure_table()
            .await
            .map_err(|e| SchedulerError::Table(format!("the job table is not available: {e}")))?;

        let mut settings = QueueSettings::with_capacity(config.queue_capacity_bytes);
        settings.max_concurrent_jobs_per_token = config.max_concurrent_jobs_per_token;
        let container = JobQueueContainer::new(
            config.supported_backends,
            settings,
            Arc::new(config.priority_config),
            config.unify_backends,
        );

        let manager = Self {
            queues: Mutex::new(container),
            table,
            repository,
            clock,
        };
        manager.restore_job_queue().await?;
        manager.fail_running_jobs().await?;
        Ok(manager)
    }

    /// Re-enqueue every QUEUED record from the durable table.
    async fn restore_job_queue(&self) -> SchedulerResult<()> {
        let queued_items = self
            .table
            .query_by_status(JobStatus::Queued.as_str())
            .await
            .map_err(|e| SchedulerError::Table(format!("failed to retrieve queued items: {e}")))?;

        let mut queues = self.queues.lock().await;
        for item in queued_items {
            let job_metadata = JobMetadata::from_item(&item)?;
            let job_id = job_metadata.job_id.clone();
            let requested_backend = job_metadata.requested_backend.clone();

            if !queues.contains(&requested_backend) {
                error!(
                    "Failed to restore a job due to unknown backend \
                     (job ID: {job_id}, requested backend: {requested_backend})."
                );
                self.mark_queued_job_as_failed(
                    &job_id,
                    &get_status_message("CRITICAL_ERROR", &[]),
                    self.clock.now(),
                )
                .await;
                continue;
            }

            let Some(queued_at) = job_metadata.queued_at else {
                error!("Failed to restore a job due to missing 'queued_at' (job ID: {job_id}).");
                self.mark_queued_job_as_failed(
                    &job_id,
                    &get_status_message("CRITICAL_ERROR", &[]),
                    self.clock.now(),
                )
                .await;
                continue;
            };

            let Some(program) = self.repository.download_job_input(&job_id).await else {
                error!("Failed to download a job program (job ID: {job_id}).");
                self.mark_queued_job_as_failed(
                    &job_id,
                    &get_status_message("INTERNAL_ERROR", &[]),
                    self.clock.now(),
                )
                .await;
                continue;
            };

            let pushed = queues.get_mut(&requested_backend)?.try_push(
                &job_id,
                program,
                &job_metadata.token,
                &job_metadata.role,
                queued_at,
                Duration::seconds(job_metadata.max_elapsed_s as i64),
            )?;
            if !pushed {
                error!(
                    "Failed to restore a job due to current resource limits (job ID: {job_id})."
                );
                self.mark_queued_job_as_failed(
                    &job_id,
                    &get_status_message("RESOURCE_LIMIT_EXCEEDED", &[]),
                    self.clock.now(),
                )
                .await;
            }
        }
        Ok(())
    }

    /// Transition every RUNNING record to FAILED, skipping records a
    /// concurrent finalize already moved on.
    async fn fail_running_jobs(&self) -> SchedulerResult<()> {
        let running_items = self
            .table
            .query_by_status(JobStatus::Running.as_str())
            .await?;

        for item in running_items {
            let Some(AttrValue::S(job_id)) = item.get("job_id") else {
                warn!("Skipping a running item without a job_id attribute.");
                continue;
            };
            info!("Updating the item status from 'RUNNING' to 'FAILED' (job ID: {job_id}).");
            match self
                .table
                .update_item_if_status(
                    job_id,
                    JobStatus::Running.as_str(),
                    status_updates(JobStatus::Failed),
                )
                .await
            {
                Ok(true) => {}
                Ok(false) | Err(SchedulerError::ItemMissing(_)) => {
                    warn!(
                        "Skipping update because the item status has been changed \
                         (job ID: {job_id})."
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn map_execution_status(&self, execution_status: ExecutionStatus) -> JobStatus {
        match execution_status {
            ExecutionStatus::Success => JobStatus::Completed,
            ExecutionStatus::Failure => JobStatus::Failed,
            ExecutionStatus::Timeout => JobStatus::Timeout,
            other => {
                warn!("Unknown execution status: {other:?}. Falling back to UNSPECIFIED.");
                JobStatus::Unspecified
            }
        }
    }

    /// Best-effort FAILED update for a job that left the queue.
    async fn mark_queued_job_as_failed(
        &self,
        job_id: &str,
        status_message: &StatusMessage,
        dequeued_at: DateTime<FixedOffset>,
    ) {
        debug!("Updating the job status to FAILED (job ID: {job_id}).");
        let mut updates = status_updates(JobStatus::Failed);
        updates.insert(
            "status_code".to_string(),
            AttrValue::S(status_message.code.clone()),
        );
        updates.insert(
            "status_message".to_string(),
            AttrValue::S(status_message.message.clone()),
        );
        updates.insert("dequeued_at".to_string(), datetime_attr(dequeued_at));
        if let Err(e) = self.table.update_item(job_id, updates).await {
            error!("Failed to update the job status to FAILED (job ID: {job_id}): {e}");
        }
    }

    /// Add a job request, returning the initial metadata including the
    /// job ID.
    ///
    /// Failures are recorded in the returned metadata rather than raised;
    /// the durable record is written in every case except a duplicate
    /// queue ID, which would clobber the record that already owns it.
    pub async fn add_job_request(
        &self,
        job_request: &SubmitJobRequest,
        token_info: &TokenInfo,
    ) -> JobMetadata {
        let mut queues = self.queues.lock().await;

        let requested_backend = job_request.job.settings.backend.clone();
        let job_id = Uuid::new_v4().to_string();
        debug!("Created a job ID: {job_id}.");

        let mut job_metadata = JobMetadata::new(
            JobMetadataInit {
                job_id: job_id.clone(),
                sdk_version: job_request.sdk_version.clone(),
                token: job_request.token.clone(),
                role: token_info.role.clone(),
                requested_backend: requested_backend.clone(),
                n_shots: job_request.job.settings.n_shots,
                max_elapsed_s: job_request.job.settings.timeout_s,
                save_job: job_request.options.save_job,
                state_save_policy: job_request.job.settings.state_save_policy,
                resource_squeezing_level: job_request.job.settings.resource_squeezing_level,
                scheduler_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            },
            self.clock.now(),
        );

        debug!("Adding a job to the job queue (job ID: {job_id}).");
        if !queues.contains(&requested_backend) {
            debug!("{requested_backend} is not a supported backend (job ID: {job_id}).");
            let status_message = get_status_message(
                "INVALID_REQUEST",
                &[(
                    "reason",
                    &format!("{requested_backend} is not a supported backend."),
                )],
            );
            set_failed(&mut job_metadata, &status_message);
        } else {
            let queued_at = self.clock.now();
            let push_result = match queues.get_mut(&requested_backend) {
                Ok(queue) => queue.try_push(
                    &job_id,
                    job_request.job.program.clone(),
                    &job_request.token,
                    &token_info.role,
                    queued_at,
                    Duration::seconds(job_request.job.settings.timeout_s as i64),
                ),
                Err(e) => Err(e),
            };
            match push_result {
                Ok(true) => {
                    job_metadata.status = JobStatus::Queued;
                    job_metadata.queued_at = Some(queued_at);
                }
                Ok(false) => {
                    set_failed(
                        &mut job_metadata,
                        &get_status_message("RESOURCE_LIMIT_EXCEEDED", &[]),
                    );
                }
                Err(e) => {
                    // A job with this ID is already queued; return without
                    // overwriting the record that owns it.
                    error!("Failed to add the job to the queue (job ID: {job_id}): {e}");
                    set_failed(&mut job_metadata, &get_status_message("CRITICAL_ERROR", &[]));
                    return job_metadata;
                }
            }

            if job_metadata.status == JobStatus::Queued {
                if let Err(e) = self
                    .repository
                    .upload_job_input(&job_request.job.program, &job_metadata)
                    .await
                {
                    error!("Failed to upload the job input (job ID: {job_id}): {e}");
                    // Without its input the entry must not stay dispatchable.
                    if let Ok(queue) = queues.get_mut(&requested_backend) {
                        queue.try_remove(&job_id);
                    }
                    let key = match e {
                        SchedulerError::Storage(_) => "INTERNAL_ERROR",
                        _ => "CRITICAL_ERROR",
                    };
                    set_failed(&mut job_metadata, &get_status_message(key, &[]));
                }
            }
        }

        debug!("Uploading the job metadata to the database (job ID: {job_id}).");
        if let Err(e) = self.table.put_new_item(job_metadata.to_item()).await {
            error!("Failed to upload the job metadata to the database (job ID: {job_id}): {e}");
            if job_metadata.status == JobStatus::Queued {
                if let Ok(queue) = queues.get_mut(&requested_backend) {
                    queue.try_remove(&job_id);
                }
            }
            set_failed(&mut job_metadata, &get_status_message("INTERNAL_ERROR", &[]));
        }

        job_metadata
    }

    /// Cancel a job.
    ///
    /// Succeeds only while the job is still waiting in a queue; a job that
    /// is running, finished, or already cancelled reports an invalid job
    /// state.
    pub async fn cancel_job(&self, job_id: &str) -> Result<(), StatusMessage> {
        let mut queues = self.queues.lock().await;

        match self.table.contains_item(job_id, false).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("The item with job ID {job_id} does not exist in the database.");
                return Err(get_status_message("JOB_NOT_FOUND", &[("job_id", job_id)]));
            }
            Err(e) => {
                error!("Failed to cancel the job (job ID: {job_id}): {e}");
                return Err(get_status_message("INTERNAL_ERROR", &[]));
            }
        }

        let job_metadata = match self.get_job_metadata(job_id, false).await {
            Ok(job_metadata) => job_metadata,
            Err(e) => {
                error!("Failed to cancel the job (job ID: {job_id}): {e}");
                return Err(get_status_message("INTERNAL_ERROR", &[]));
            }
        };

        let removed = match queues.get_mut(&job_metadata.requested_backend) {
            Ok(queue) => queue.try_remove(job_id),
            Err(e) => {
                error!("Failed to cancel the job (job ID: {job_id}): {e}");
                return Err(get_status_message("INTERNAL_ERROR", &[]));
            }
        };
        if !removed {
            debug!("The job may already be running or cancelled (job ID: {job_id}).");
            return Err(get_status_message("INVALID_JOB_STATE", &[]));
        }
        debug!("The job was successfully removed from the queue (job ID: {job_id}).");

        debug!("Updating the job status to CANCELLED (job ID: {job_id}).");
        if let Err(e) = self
            .table
            .update_item(job_id, status_updates(JobStatus::Cancelled))
            .await
        {
            error!("Failed to cancel the job (job ID: {job_id}): {e}");
            return Err(get_status_message("INTERNAL_ERROR", &[]));
        }
        Ok(())
    }

    /// Get the metadata of a job.
    ///
    /// With `consistent_read`, the existence check sees the most recent
    /// write at the cost of double read capacity.
    pub async fn get_job_metadata(
        &self,
        job_id: &str,
        consistent_read: bool,
    ) -> SchedulerResult<JobMetadata> {
        if !self.table.contains_item(job_id, consistent_read).await? {
            return Err(SchedulerError::JobNotFound(job_id.to_string()));
        }
        let item = self.table.get_item(job_id).await?;
        JobMetadata::from_item(&item)
    }

    /// Fetch the next job from the queue and build the assignment for the
    /// executor.
    pub async fn fetch_next_job_to_execute(
        &self,
        request: &AssignNextJobRequest,
    ) -> AssignNextJobResponse {
        let mut queues = self.queues.lock().await;

        let requested_backend = &request.backend;
        if !queues.contains(requested_backend) {
            let reason = format!("{requested_backend} is not a supported backend.");
            debug!("{reason}");
            return assign_error(get_status_message("INVALID_REQUEST", &[("reason", &reason)]));
        }

        debug!("Fetching the next job from the queue.");
        let now = self.clock.now();
        let popped = match queues.get_mut(requested_backend) {
            Ok(queue) => queue.try_pop(now),
            Err(_) => None,
        };
        let Some((job_id, program)) = popped else {
            return AssignNextJobResponse::default();
        };
        let dequeued_at = self.clock.now();

        debug!("Retrieving the job metadata (job ID: {job_id}).");
        let job_metadata = match self.get_job_metadata(&job_id, true).await {
            Ok(job_metadata) => job_metadata,
            Err(e) => {
                error!("Failed to retrieve the execution settings (job ID: {job_id}): {e}");
                let status_message = get_status_message("INTERNAL_ERROR", &[]);
                self.mark_queued_job_as_failed(&job_id, &status_message, dequeued_at)
                    .await;
                return assign_error(status_message);
            }
        };
        let settings = JobExecutionSettings {
            backend: job_metadata.requested_backend.clone(),
            n_shots: job_metadata.n_shots,
            timeout_s: job_metadata.max_elapsed_s,
            state_save_policy: job_metadata.state_save_policy,
            resource_squeezing_level: job_metadata.resource_squeezing_level,
            role: job_metadata.role.clone(),
        };

        let (upload_url, expires_at) = match self.repository.generate_upload_url(&job_id).await {
            Ok(target) => target,
            Err(e) => {
                error!("Failed to generate the upload URL (job ID: {job_id}): {e}");
                let status_message = get_status_message("INTERNAL_ERROR", &[]);
                self.mark_queued_job_as_failed(&job_id, &status_message, dequeued_at)
                    .await;
                return assign_error(status_message);
            }
        };

        debug!("Updating the job status to RUNNING (job ID: {job_id}).");
        let mut updates = status_updates(JobStatus::Running);
        updates.insert("dequeued_at".to_string(), datetime_attr(dequeued_at));
        match self.table.update_item(&job_id, updates).await {
            Ok(()) => AssignNextJobResponse {
                job_id: Some(job_id),
                job: Some(Job { program, settings }),
                upload_target: Some(JobResultUploadTarget {
                    upload_url,
                    expires_at,
                }),
                error: None,
            },
            Err(e) => {
                error!("Failed to update the job status to RUNNING (job ID: {job_id}): {e}");
                let status_message = get_status_message("INTERNAL_ERROR", &[]);
                // The durable record still says QUEUED; one re-enqueue with
                // the persisted queued_at keeps recovery from dispatching
                // the job twice.
                let requeued = match (job_metadata.queued_at, queues.get_mut(requested_backend)) {
                    (Some(queued_at), Ok(queue)) => matches!(
                        queue.try_push(
                            &job_id,
                            program,
                            &job_metadata.token,
                            &job_metadata.role,
                            queued_at,
                            Duration::seconds(job_metadata.max_elapsed_s as i64),
                        ),
                        Ok(true)
                    ),
                    _ => false,
                };
                if !requeued {
                    self.mark_queued_job_as_failed(&job_id, &status_message, dequeued_at)
                        .await;
                }
                assign_error(status_message)
            }
        }
    }

    /// Finalize a job from the executor's report.
    pub async fn finalize_job(
        &self,
        execution_result: &ReportExecutionResultRequest,
    ) -> ReportExecutionResultResponse {
        let _queues = self.queues.lock().await;

        let job_id = &execution_result.job_id;
        match self.table.contains_item(job_id, false).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    "Failed to finalize job because the corresponding job was not found \
                     (job ID: {job_id})."
                );
                return report_error(get_status_message("JOB_NOT_FOUND", &[("job_id", job_id)]));
            }
            Err(e) => {
                error!("Failed to finalize job due to an internal error (job ID: {job_id}): {e}");
                return report_error(get_status_message("INTERNAL_ERROR", &[]));
            }
        }

        let status = self.map_execution_status(execution_result.status);

        if status == JobStatus::Completed {
            // The result object was uploaded through the presigned URL;
            // stamp its access tags before the record turns terminal.
            debug!("Set tags to the result object (job ID: {job_id}).");
            let tagged = match self.get_job_metadata(job_id, false).await {
                Ok(job_metadata) => self
                    .repository
                    .put_tags_to_result(job_id, &job_metadata.role, job_metadata.save_job)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = tagged {
                error!("Failed to set tags to the result object (job ID: {job_id}): {e}");
                return report_error(get_status_message("INTERNAL_ERROR", &[]));
            }
        }

        debug!("Updating the job metadata (job ID: {job_id}).");
        let now = self.clock.now();
        let mut updates = status_updates(status);
        updates.insert(
            "status_code".to_string(),
            AttrValue::S(execution_result.error.code.clone()),
        );
        updates.insert(
            "status_message".to_string(),
            AttrValue::S(execution_result.error.description.clone()),
        );
        updates.insert(
            "actual_backend_name".to_string(),
            AttrValue::S(execution_result.actual_backend.clone()),
        );
        updates.insert(
            "physical_lab_version".to_string(),
            AttrValue::S(execution_result.version.physical_lab.clone()),
        );
        updates.insert(
            "quantum_computer_version".to_string(),
            AttrValue::S(execution_result.version.quantum_computer.clone()),
        );
        updates.insert(
            "simulator_version".to_string(),
            AttrValue::S(execution_result.version.simulator.clone()),
        );
        updates.insert(
            "compile_started_at".to_string(),
            opt_datetime_attr(execution_result.timestamps.compile_started_at),
        );
        updates.insert(
            "compile_finished_at".to_string(),
            opt_datetime_attr(execution_result.timestamps.compile_finished_at),
        );
        updates.insert(
            "execution_started_at".to_string(),
            opt_datetime_attr(execution_result.timestamps.execution_started_at),
        );
        updates.insert(
            "execution_finished_at".to_string(),
            opt_datetime_attr(execution_result.timestamps.execution_finished_at),
        );
        updates.insert(
            "raw_size_bytes".to_string(),
            AttrValue::N(execution_result.uploaded_result.raw_size_bytes.to_string()),
        );
        updates.insert(
            "encoded_size_bytes".to_string(),
            AttrValue::N(
                execution_result
                    .uploaded_result
                    .encoded_size_bytes
                    .to_string(),
            ),
        );
        updates.insert("finished_at".to_string(), datetime_attr(now));
        updates.insert(
            "job_expiry".to_string(),
            datetime_attr(now + Duration::days(crate::constants::JOB_EXPIRY_DAYS)),
        );

        if let Err(e) = self.table.update_item(job_id, updates).await {
            error!("Failed to update the job metadata (job ID: {job_id}): {e}");
            return report_error(get_status_message("INTERNAL_ERROR", &[]));
        }

        info!("Successfully updated the finished job metadata (job ID: {job_id}).");
        ReportExecutionResultResponse::default()
    }

    /// Presigned URL for downloading the result of a job.
    pub async fn get_job_result_download_url(
        &self,
        job_id: &str,
    ) -> SchedulerResult<(String, DateTime<FixedOffset>)> {
        self.repository.generate_download_url(job_id).await
    }

    /// Presigned URL for uploading the result of a job.
    pub async fn get_job_result_upload_url(
        &self,
        job_id: &str,
    ) -> SchedulerResult<(String, DateTime<FixedOffset>)> {
        self.repository.generate_upload_url(job_id).await
    }

    /// Number of jobs currently queued for a backend.
    pub async fn queued_job_count(&self, backend: &str) -> SchedulerResult<usize> {
        let queues = self.queues.lock().await;
        Ok(queues.get(backend)?.len())
    }
}
