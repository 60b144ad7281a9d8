//! Submission surface.
//!
//! Every operation threads token validation, then (for submit) a
//! per-role size check and the backend-availability gate, before calling
//! into the job manager. Failures never cross the boundary raw; they are
//! translated through the status-message catalog.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::models::*;
use crate::backend::{BackendAvailability, BackendStatusView, ServiceStatus};
use crate::clock::SharedClock;
use crate::error::SchedulerError;
use crate::job::manager::JobManager;
use crate::job::metadata::JobStatus;
use crate::messages::get_status_message;
use crate::stores::tokens::{TokenInfo, TokenService};

/// Submission facade shared by all submission RPC handlers.
pub struct SubmissionApi {
    token_service: Arc<dyn TokenService>,
    backend_view: Arc<Mutex<BackendStatusView>>,
    job_manager: Arc<JobManager>,
    /// Role to maximum byte size of a submission request.
    max_job_bytes: HashMap<String, usize>,
    clock: SharedClock,
}

impl SubmissionApi {
    pub fn new(
        token_service: Arc<dyn TokenService>,
        backend_view: Arc<Mutex<BackendStatusView>>,
        job_manager: Arc<JobManager>,
        max_job_bytes: HashMap<String, usize>,
        clock: SharedClock,
    ) -> Self {
        Self {
            token_service,
            backend_view,
            job_manager,
            max_job_bytes,
            clock,
        }
    }

    /// Verify a token, yielding its identity or a ready-made error block.
    async fn verify_token(&self, token: &str) -> Result<TokenInfo, ErrorDetail> {
        if token.is_empty() {
            let reason = "Token is empty.";
            info!("{reason}");
            return Err(get_status_message("INVALID_TOKEN", &[("reason", reason)]).into());
        }

        info!("Retrieving the token info (token: {token}).");
        let token_info = match self.token_service.get_token_info(token).await {
            Ok(token_info) => token_info,
            Err(e) => {
                error!("Failed to verify token due to token database error: {e}");
                return Err(get_status_message("INTERNAL_ERROR", &[]).into());
            }
        };

        let Some(token_info) = token_info else {
            let reason = format!("Token is not found (token: {token}).");
            info!("{reason}");
            return Err(get_status_message("INVALID_TOKEN", &[("reason", &reason)]).into());
        };

        if token_info.is_expired(self.clock.now()) {
            let reason = format!("Token is expired (token: {token}).");
            info!("{reason}");
            return Err(get_status_message("INVALID_TOKEN", &[("reason", &reason)]).into());
        }

        Ok(token_info)
    }

    /// Resolve the availability of a backend for a role, translating
    /// lookup failures into error blocks.
    async fn resolve_service_status(
        &self,
        backend: &str,
        role: &str,
    ) -> Result<BackendAvailability, ErrorDetail> {
        let backend_view = self.backend_view.lock().await;
        match backend_view.availability(backend, role).await {
            Ok(availability) => Ok(availability),
            Err(
                e @ (SchedulerError::UnknownBackend(_) | SchedulerError::UnknownRole { .. }),
            ) => {
                info!("{e}");
                Err(get_status_message("INVALID_REQUEST", &[("reason", &e.to_string())]).into())
            }
            Err(e) => {
                error!(
                    "Failed to resolve the service status (backend: {backend}, role: {role}): {e}"
                );
                Err(get_status_message("CRITICAL_ERROR", &[]).into())
            }
        }
    }

    /// Register the job submitted by a user with the job manager.
    pub async fn submit_job(&self, request: SubmitJobRequest) -> SubmitJobResponse {
        debug!("Verifying the token for `SubmitJob` (token: {}).", request.token);
        let token_info = match self.verify_token(&request.token).await {
            Ok(token_info) => token_info,
            Err(error) => return SubmitJobResponse { job_id: None, error: Some(error) },
        };

        debug!("Checking the job byte size (role: {}).", token_info.role);
        let byte_size = serde_json::to_vec(&request).map(|b| b.len()).unwrap_or(0);
        if let Some(limit) = self.max_job_bytes.get(&token_info.role) {
            if byte_size > *limit {
                let reason = format!(
                    "Byte size of request ({byte_size}) exceeds the allowed limit ({limit})"
                );
                let status_message = get_status_message("INVALID_REQUEST", &[("reason", &reason)]);
                return SubmitJobResponse {
                    job_id: None,
                    error: Some(status_message.into()),
                };
            }
        }

        debug!("Checking the current service status (role: {}).", token_info.role);
        let availability = match self
            .resolve_service_status(&request.job.settings.backend, &token_info.role)
            .await
        {
            Ok(availability) => availability,
            Err(error) => return SubmitJobResponse { job_id: None, error: Some(error) },
        };
        if availability.status != ServiceStatus::Available {
            info!(
                "Service is not available (role: {}, status: {:?}).",
                token_info.role, availability.status
            );
            return SubmitJobResponse {
                job_id: None,
                error: Some(get_status_message("SERVER_UNAVAILABLE", &[]).into()),
            };
        }

        debug!("Adding a job request to the job manager.");
        let job_metadata = self.job_manager.add_job_request(&request, &token_info).await;

        if job_metadata.status != JobStatus::Queued {
            warn!("Failed to register a job (job ID: {}).", job_metadata.job_id);
            return SubmitJobResponse {
                job_id: None,
                error: Some(ErrorDetail {
                    code: job_metadata.status_code,
                    description: job_metadata.status_message,
                }),
            };
        }

        info!("Successfully submitted a job (job ID: {}).", job_metadata.job_id);
        SubmitJobResponse {
            job_id: Some(job_metadata.job_id),
            error: None,
        }
    }

    /// Return the job status of the specified job ID.
    pub async fn get_job_status(&self, request: GetJobStatusRequest) -> GetJobStatusResponse {
        debug!("Verifying the token for `GetJobStatus` (token: {}).", request.token);
        if let Err(error) = self.verify_token(&request.token).await {
            return GetJobStatusResponse {
                error: Some(error),
                ..Default::default()
            };
        }

        info!("Retrieving the job metadata (job ID: {}).", request.job_id);
        let metadata = match self.job_manager.get_job_metadata(&request.job_id, false).await {
            Ok(metadata) => metadata,
            Err(e @ SchedulerError::JobNotFound(_)) => {
                info!("{e}");
                return GetJobStatusResponse {
                    error: Some(
                        get_status_message("JOB_NOT_FOUND", &[("job_id", &request.job_id)]).into(),
                    ),
                    ..Default::default()
                };
            }
            Err(e) => {
                error!(
                    "Failed to retrieve the job metadata (job ID: {}): {e}",
                    request.job_id
                );
                return GetJobStatusResponse {
                    error: Some(get_status_message("INTERNAL_ERROR", &[]).into()),
                    ..Default::default()
                };
            }
        };

        info!("Successfully retrieved the job status (job ID: {}).", request.job_id);
        GetJobStatusResponse {
            status: Some(metadata.status),
            status_detail: metadata.status_message.clone(),
            execution_details: Some(JobExecutionDetails {
                version: metadata.execution_version(),
                timestamps: metadata.timestamps(),
            }),
            error: None,
        }
    }

    /// Return the job result, including a presigned download URL.
    pub async fn get_job_result(&self, request: GetJobResultRequest) -> GetJobResultResponse {
        debug!("Verifying the token for `GetJobResult` (token: {}).", request.token);
        if let Err(error) = self.verify_token(&request.token).await {
            return GetJobResultResponse {
                error: Some(error),
                ..Default::default()
            };
        }

        info!("Retrieving the job metadata (job ID: {}).", request.job_id);
        let metadata = match self.job_manager.get_job_metadata(&request.job_id, false).await {
            Ok(metadata) => metadata,
            Err(e @ SchedulerError::JobNotFound(_)) => {
                info!("{e}");
                return GetJobResultResponse {
                    error: Some(
                        get_status_message("JOB_NOT_FOUND", &[("job_id", &request.job_id)]).into(),
                    ),
                    ..Default::default()
                };
            }
            Err(e) => {
                error!(
                    "Failed to retrieve the job metadata (job ID: {}): {e}",
                    request.job_id
                );
                return GetJobResultResponse {
                    error: Some(get_status_message("INTERNAL_ERROR", &[]).into()),
                    ..Default::default()
                };
            }
        };

        if metadata.status != JobStatus::Completed {
            let reason = format!(
                "The job is not completed (job ID: {}, current status: {}).",
                request.job_id, metadata.status
            );
            info!("{reason}");
            return GetJobResultResponse {
                error: Some(get_status_message("INVALID_REQUEST", &[("reason", &reason)]).into()),
                ..Default::default()
            };
        }

        debug!("Generating the URL to download the job result (job ID: {}).", request.job_id);
        let result_url = match self
            .job_manager
            .get_job_result_download_url(&request.job_id)
            .await
        {
            Ok((result_url, _expires_at)) => result_url,
            Err(e) => {
                error!(
                    "Failed to generate the download URL (job ID: {}): {e}",
                    request.job_id
                );
                return GetJobResultResponse {
                    error: Some(get_status_message("INTERNAL_ERROR", &[]).into()),
                    ..Default::default()
                };
            }
        };

        info!("Successfully retrieved the job result (job ID: {}).", request.job_id);
        GetJobResultResponse {
            status: Some(metadata.status),
            status_detail: metadata.status_message.clone(),
            execution_details: Some(JobExecutionDetails {
                version: metadata.execution_version(),
                timestamps: metadata.timestamps(),
            }),
            result: Some(JobResult { result_url }),
            error: None,
        }
    }

    /// Cancel the specified job.
    pub async fn cancel_job(&self, request: CancelJobRequest) -> CancelJobResponse {
        debug!("Verifying the token for `CancelJob` (token: {}).", request.token);
        if let Err(error) = self.verify_token(&request.token).await {
            return CancelJobResponse { error: Some(error) };
        }

        debug!("Canceling the job (job ID: {}).", request.job_id);
        match self.job_manager.cancel_job(&request.job_id).await {
            Ok(()) => {
                info!("Successfully cancelled the job (job ID: {}).", request.job_id);
                CancelJobResponse { error: None }
            }
            Err(status_message) => {
                info!("Failed to cancel the job (job ID: {}).", request.job_id);
                CancelJobResponse {
                    error: Some(status_message.into()),
                }
            }
        }
    }

    /// Return the service status for a backend.
    pub async fn get_service_status(
        &self,
        request: GetServiceStatusRequest,
    ) -> GetServiceStatusResponse {
        debug!("Verifying the token for `GetServiceStatus` (token: {}).", request.token);
        let token_info = match self.verify_token(&request.token).await {
            Ok(token_info) => token_info,
            Err(error) => {
                return GetServiceStatusResponse {
                    error: Some(error),
                    ..Default::default()
                }
            }
        };

        debug!(
            "Resolving the service status (backend: {}, role: {}).",
            request.backend, token_info.role
        );
        let availability = match self
            .resolve_service_status(&request.backend, &token_info.role)
            .await
        {
            Ok(availability) => availability,
            Err(error) => {
                return GetServiceStatusResponse {
                    error: Some(error),
                    ..Default::default()
                }
            }
        };

        if availability.status != ServiceStatus::Available {
            info!(
                "Service is not available (role: {}, status: {:?}).",
                token_info.role, availability.status
            );
            return GetServiceStatusResponse {
                error: Some(get_status_message("SERVER_UNAVAILABLE", &[]).into()),
                ..Default::default()
            };
        }

        info!("Service is available (role: {}).", token_info.role);
        GetServiceStatusResponse {
            status: Some(availability.status),
            description: availability.description,
            error: None,
        }
    }
}
