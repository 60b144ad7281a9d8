//! Execution surface.
//!
//! Backend workers pull the next job to run, report its result, and
//! refresh expired upload URLs through this facade.

use std::sync::Arc;
use tracing::{debug, error, info};

use crate::api::models::*;
use crate::error::SchedulerError;
use crate::job::manager::JobManager;
use crate::job::metadata::JobStatus;
use crate::messages::get_status_message;

/// Execution facade shared by all execution RPC handlers.
pub struct ExecutionApi {
    job_manager: Arc<JobManager>,
}

impl ExecutionApi {
    pub fn new(job_manager: Arc<JobManager>) -> Self {
        Self { job_manager }
    }

    /// Assign the next job to be executed on the requesting backend.
    pub async fn assign_next_job(&self, request: AssignNextJobRequest) -> AssignNextJobResponse {
        let response = self.job_manager.fetch_next_job_to_execute(&request).await;

        if let Some(job_id) = &response.job_id {
            info!(
                "Send a job to the executor (job ID: {job_id}, backend: {}).",
                request.backend
            );
        }
        response
    }

    /// Report the execution result of a job.
    pub async fn report_execution_result(
        &self,
        request: ReportExecutionResultRequest,
    ) -> ReportExecutionResultResponse {
        debug!("Reporting the execution result (job ID: {}).", request.job_id);
        self.job_manager.finalize_job(&request).await
    }

    /// Regenerate the URL for uploading the result of a job.
    ///
    /// Refused unless the job is currently QUEUED or RUNNING.
    pub async fn refresh_upload_url(
        &self,
        request: RefreshUploadUrlRequest,
    ) -> RefreshUploadUrlResponse {
        info!("Retrieving the job metadata (job ID: {}).", request.job_id);
        match self.job_manager.get_job_metadata(&request.job_id, false).await {
            Ok(metadata) => {
                if !matches!(metadata.status, JobStatus::Queued | JobStatus::Running) {
                    info!(
                        "Job status is not QUEUED or RUNNING (job ID: {}).",
                        request.job_id
                    );
                    let status_message = get_status_message(
                        "INVALID_REQUEST",
                        &[("reason", "Job status is not QUEUED or RUNNING.")],
                    );
                    return RefreshUploadUrlResponse {
                        upload_target: None,
                        error: Some(status_message.into()),
                    };
                }
            }
            Err(e @ SchedulerError::JobNotFound(_)) => {
                info!("{e}");
                return RefreshUploadUrlResponse {
                    upload_target: None,
                    error: Some(
                        get_status_message("JOB_NOT_FOUND", &[("job_id", &request.job_id)]).into(),
                    ),
                };
            }
            Err(e) => {
                error!(
                    "Failed to retrieve the job metadata (job ID: {}): {e}",
                    request.job_id
                );
                return RefreshUploadUrlResponse {
                    upload_target: None,
                    error: Some(get_status_message("INTERNAL_ERROR", &[]).into()),
                };
            }
        }

        debug!("Generating a new upload URL (job ID: {}).", request.job_id);
        match self
            .job_manager
            .get_job_result_upload_url(&request.job_id)
            .await
        {
            Ok((upload_url, expires_at)) => {
                info!("Successfully refreshed the upload URL (job ID: {}).", request.job_id);
                RefreshUploadUrlResponse {
                    upload_target: Some(JobResultUploadTarget {
                        upload_url,
                        expires_at,
                    }),
                    error: None,
                }
            }
            Err(e) => {
                error!(
                    "Failed to generate a new upload URL (job ID: {}): {e}",
                    request.job_id
                );
                RefreshUploadUrlResponse {
                    upload_target: None,
                    error: Some(get_status_message("INTERNAL_ERROR", &[]).into()),
                }
            }
        }
    }
}
