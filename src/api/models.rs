//! Request/response models for both RPC surfaces.
//!
//! Program bytes travel base64-encoded in JSON bodies. Optional response
//! fields are omitted when unset, so an error response carries only its
//! `error` block.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::backend::ServiceStatus;
use crate::job::metadata::{JobStatus, StateSavePolicy};
use crate::messages::StatusMessage;

/// Base64 (de)serialization for program bytes.
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Error block attached to failed responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub description: String,
}

impl From<StatusMessage> for ErrorDetail {
    fn from(message: StatusMessage) -> Self {
        Self {
            code: message.code,
            description: message.message,
        }
    }
}

/// Execution settings of a job, as handed to the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobExecutionSettings {
    pub backend: String,
    pub n_shots: u64,
    pub timeout_s: u64,
    pub state_save_policy: StateSavePolicy,
    pub resource_squeezing_level: f64,
    pub role: String,
}

/// A job: program plus execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(with = "base64_bytes")]
    pub program: Vec<u8>,
    pub settings: JobExecutionSettings,
}

/// Job management options chosen at submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJobOptions {
    pub save_job: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub token: String,
    pub job: Job,
    #[serde(default)]
    pub options: SubmitJobOptions,
    #[serde(default)]
    pub sdk_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetJobStatusRequest {
    pub token: String,
    pub job_id: String,
}

/// Version strings captured during execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionVersion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub physical_lab_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulator_version: Option<String>,
}

/// Lifecycle timestamps of a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTimestamps {
    pub submitted_at: Option<DateTime<FixedOffset>>,
    pub queued_at: Option<DateTime<FixedOffset>>,
    pub dequeued_at: Option<DateTime<FixedOffset>>,
    pub compile_started_at: Option<DateTime<FixedOffset>>,
    pub compile_finished_at: Option<DateTime<FixedOffset>>,
    pub execution_started_at: Option<DateTime<FixedOffset>>,
    pub execution_finished_at: Option<DateTime<FixedOffset>>,
    pub finished_at: Option<DateTime<FixedOffset>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobExecutionDetails {
    pub version: JobExecutionVersion,
    pub timestamps: JobTimestamps,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetJobStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub status_detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_details: Option<JobExecutionDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetJobResultRequest {
    pub token: String,
    pub job_id: String,
}

/// Result block: a presigned URL for downloading the result object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobResult {
    pub result_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetJobResultResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub status_detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_details: Option<JobExecutionDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelJobRequest {
    pub token: String,
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelJobResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetServiceStatusRequest {
    pub token: String,
    pub backend: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetServiceStatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
    #[serde(default)]
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignNextJobRequest {
    pub backend: String,
}

/// Where the executor should upload the result, and until when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResultUploadTarget {
    pub upload_url: String,
    pub expires_at: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignNextJobResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Job>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_target: Option<JobResultUploadTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Outcome reported by the executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    #[default]
    Unspecified,
    Success,
    Failure,
    Timeout,
}

/// Version strings of the executing stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResultVersion {
    #[serde(default)]
    pub physical_lab: String,
    #[serde(default)]
    pub quantum_computer: String,
    #[serde(default)]
    pub simulator: String,
}

/// Timestamps measured by the executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTimestamps {
    pub compile_started_at: Option<DateTime<FixedOffset>>,
    pub compile_finished_at: Option<DateTime<FixedOffset>>,
    pub execution_started_at: Option<DateTime<FixedOffset>>,
    pub execution_finished_at: Option<DateTime<FixedOffset>>,
}

/// Size of the result object uploaded by the executor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UploadedResult {
    pub raw_size_bytes: u64,
    pub encoded_size_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportExecutionResultRequest {
    pub job_id: String,
    #[serde(default)]
    pub status: ExecutionStatus,
    #[serde(default)]
    pub error: ErrorDetail,
    #[serde(default)]
    pub timestamps: ExecutionTimestamps,
    #[serde(default)]
    pub uploaded_result: UploadedResult,
    #[serde(default)]
    pub actual_backend: String,
    #[serde(default)]
    pub version: ExecutionResultVersion,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportExecutionResultResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshUploadUrlRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshUploadUrlResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_target: Option<JobResultUploadTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}
