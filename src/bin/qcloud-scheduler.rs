//! Scheduler server binary.
//!
//! Boots both RPC surfaces against in-memory backing stores. Production
//! deployments supply their own implementations of the store traits; the
//! in-memory wiring here is for development and integration testing.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use anyhow::{anyhow, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use qcloud_scheduler::api::server::{serve, ServerConfig};
use qcloud_scheduler::api::{ExecutionApi, SubmissionApi};
use qcloud_scheduler::stores::{
    BlobStore, MemoryBlobStore, MemoryJobTable, MemoryParameterStore, MemoryTokenService,
    ParameterStore, TokenInfo,
};
use qcloud_scheduler::{
    BackendStatusView, JobManager, JobManagerConfig, JobRepository, PriorityConfig,
    SchedulerConfig, SystemClock,
};

const DEV_BACKEND_STATUS: &str = r#"
[backends.qpu.admin]
status = "available"
description = "Development QPU."

[backends.qpu.developer]
status = "available"
description = "Development QPU."

[backends.qpu.guest]
status = "available"
description = "Development QPU."

[backends.emulator.admin]
status = "available"
description = "Development emulator."

[backends.emulator.developer]
status = "available"
description = "Development emulator."

[backends.emulator.guest]
status = "available"
description = "Development emulator."
"#;

#[derive(Parser)]
#[command(name = "qcloud-scheduler")]
#[command(about = "Priority job scheduler for a photonic quantum computing cloud")]
#[command(version)]
struct Cli {
    /// Bind address for the submission surface
    #[arg(long, default_value = "[::]:8082")]
    submission_addr: SocketAddr,

    /// Bind address for the execution surface
    #[arg(long, default_value = "[::]:8081")]
    execution_addr: SocketAddr,

    /// Name of the backend-status parameter
    #[arg(long, default_value = "backend-status")]
    backend_status_parameter_name: String,

    /// TOML file seeding the backend-status parameter (built-in dev
    /// document when omitted)
    #[arg(long)]
    backend_status_file: Option<PathBuf>,

    /// Treat all backends as a single unified queue
    #[arg(long)]
    unify_backends: bool,

    /// Dev tokens as token=role pairs, repeatable
    #[arg(long = "dev-token")]
    dev_tokens: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = SchedulerConfig::from_env()?;
    let clock = Arc::new(SystemClock);

    let backend_status = match &cli.backend_status_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => DEV_BACKEND_STATUS.to_string(),
    };
    let params = Arc::new(MemoryParameterStore::new());
    params.set(&cli.backend_status_parameter_name, &backend_status);

    let token_service = Arc::new(MemoryTokenService::new());
    for pair in &cli.dev_tokens {
        let (token, role) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --dev-token (expected token=role): {pair}"))?;
        token_service.insert(
            token,
            TokenInfo {
                role: role.to_string(),
                name: token.to_string(),
                expires_at: None,
            },
        );
        info!("Registered a dev token (role: {role}).");
    }
    if cli.dev_tokens.is_empty() {
        warn!("No dev tokens registered; every submission will be rejected.");
    }

    let blob_store = Arc::new(MemoryBlobStore::new());
    let repository = JobRepository::new(
        Arc::clone(&blob_store) as Arc<dyn BlobStore>,
        clock.clone(),
    );
    if !repository.bucket_exists().await {
        warn!("Blob store bucket is not reachable.");
    }

    info!(
        "Loading the backend status (key: {}).",
        cli.backend_status_parameter_name
    );
    let backend_view = BackendStatusView::new(
        &cli.backend_status_parameter_name,
        Arc::clone(&params) as Arc<dyn ParameterStore>,
        cli.unify_backends,
    )
    .await?;
    let supported_backends = backend_view.all_backends().await;

    let table = Arc::new(MemoryJobTable::new());
    let job_manager = Arc::new(
        JobManager::new(
            JobManagerConfig {
                queue_capacity_bytes: config.max_queue_bytes,
                max_concurrent_jobs_per_token: config.max_concurrent_jobs.clone(),
                supported_backends,
                unify_backends: cli.unify_backends,
                priority_config: PriorityConfig::default(),
            },
            table,
            repository,
            clock.clone(),
        )
        .await?,
    );

    let submission_api = Arc::new(SubmissionApi::new(
        token_service,
        Arc::new(Mutex::new(backend_view)),
        Arc::clone(&job_manager),
        config.max_job_bytes.clone(),
        clock,
    ));
    let execution_api = Arc::new(ExecutionApi::new(job_manager));

    serve(
        ServerConfig {
            submission_addr: cli.submission_addr,
            execution_addr: cli.execution_addr,
            submission_max_body_bytes: config.submission_max_message_length,
            execution_max_body_bytes: config.execution_max_message_length,
            submission_max_concurrency: config.submission_max_workers,
            execution_max_concurrency: config.execution_max_workers,
        },
        submission_api,
        execution_api,
    )
    .await?;
    Ok(())
}
