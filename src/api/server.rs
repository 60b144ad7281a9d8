//! HTTP server wiring for the two RPC surfaces.
//!
//! The submission and execution facades are mounted on independent
//! routers bound to independent ports, so executor traffic is never
//! starved by client traffic. Each router carries its own body-size and
//! concurrency limits.

use axum::extract::{DefaultBodyLimit, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::execution::ExecutionApi;
use crate::api::models::*;
use crate::api::submission::SubmissionApi;
use crate::error::{SchedulerError, SchedulerResult};

/// Bind addresses and per-surface limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub submission_addr: SocketAddr,
    pub execution_addr: SocketAddr,
    pub submission_max_body_bytes: usize,
    pub execution_max_body_bytes: usize,
    pub submission_max_concurrency: usize,
    pub execution_max_concurrency: usize,
}

async fn healthz() -> &'static str {
    "ok"
}

async fn submit_job(
    State(api): State<Arc<SubmissionApi>>,
    Json(request): Json<SubmitJobRequest>,
) -> Json<SubmitJobResponse> {
    Json(api.submit_job(request).await)
}

async fn get_job_status(
    State(api): State<Arc<SubmissionApi>>,
    Json(request): Json<GetJobStatusRequest>,
) -> Json<GetJobStatusResponse> {
    Json(api.get_job_status(request).await)
}

async fn get_job_result(
    State(api): State<Arc<SubmissionApi>>,
    Json(request): Json<GetJobResultRequest>,
) -> Json<GetJobResultResponse> {
    Json(api.get_job_result(request).await)
}

async fn cancel_job(
    State(api): State<Arc<SubmissionApi>>,
    Json(request): Json<CancelJobRequest>,
) -> Json<CancelJobResponse> {
    Json(api.cancel_job(request).await)
}

async fn get_service_status(
    State(api): State<Arc<SubmissionApi>>,
    Json(request): Json<GetServiceStatusRequest>,
) -> Json<GetServiceStatusResponse> {
    Json(api.get_service_status(request).await)
}

async fn assign_next_job(
    State(api): State<Arc<ExecutionApi>>,
    Json(request): Json<AssignNextJobRequest>,
) -> Json<AssignNextJobResponse> {
    Json(api.assign_next_job(request).await)
}

async fn report_execution_result(
    State(api): State<Arc<ExecutionApi>>,
    Json(request): Json<ReportExecutionResultRequest>,
) -> Json<ReportExecutionResultResponse> {
    Json(api.report_execution_result(request).await)
}

async fn refresh_upload_url(
    State(api): State<Arc<ExecutionApi>>,
    Json(request): Json<RefreshUploadUrlRequest>,
) -> Json<RefreshUploadUrlResponse> {
    Json(api.refresh_upload_url(request).await)
}

/// Router for the submission surface.
pub fn submission_router(
    api: Arc<SubmissionApi>,
    max_body_bytes: usize,
    max_concurrency: usize,
) -> Router {
    Router::new()
        .route("/v1/submission/submit-job", post(submit_job))
        .route("/v1/submission/get-job-status", post(get_job_status))
        .route("/v1/submission/get-job-result", post(get_job_result))
        .route("/v1/submission/cancel-job", post(cancel_job))
        .route("/v1/submission/get-service-status", post(get_service_status))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrency))
        .layer(TraceLayer::new_for_http())
        .with_state(api)
}

/// Router for the execution surface.
pub fn execution_router(
    api: Arc<ExecutionApi>,
    max_body_bytes: usize,
    max_concurrency: usize,
) -> Router {
    Router::new()
        .route("/v1/execution/assign-next-job", post(assign_next_job))
        .route(
            "/v1/execution/report-execution-result",
            post(report_execution_result),
        )
        .route("/v1/execution/refresh-upload-url", post(refresh_upload_url))
        .route("/healthz", get(healthz))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrency))
        .layer(TraceLayer::new_for_http())
        .with_state(api)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received CTRL-C, initiating graceful shutdown"),
        Err(e) => warn!("Failed to listen for CTRL-C: {e}"),
    }
}

async fn serve_router(router: Router, addr: SocketAddr) -> SchedulerResult<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SchedulerError::Internal(format!("failed to bind {addr}: {e}")))?;
    info!("Server listening on {addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| SchedulerError::Internal(format!("server error: {e}")))
}

/// Serve both surfaces until shutdown.
pub async fn serve(
    config: ServerConfig,
    submission_api: Arc<SubmissionApi>,
    execution_api: Arc<ExecutionApi>,
) -> SchedulerResult<()> {
    let submission = serve_router(
        submission_router(
            submission_api,
            config.submission_max_body_bytes,
            config.submission_max_concurrency,
        ),
        config.submission_addr,
    );
    let execution = serve_router(
        execution_router(
            execution_api,
            config.execution_max_body_bytes,
            config.execution_max_concurrency,
        ),
        config.execution_addr,
    );

    tokio::try_join!(submission, execution)?;
    info!("Server shutdown");
    Ok(())
}
