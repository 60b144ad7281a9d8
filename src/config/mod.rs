//! Environment-based scheduler configuration.
//!
//! Every knob is an integer environment variable with a production
//! default; an unparsable value fails startup naming the variable.

use std::collections::HashMap;

use crate::error::{SchedulerError, SchedulerResult};

const MIB: usize = 1024 * 1024;

fn env_usize(name: &str, default: usize) -> SchedulerResult<usize> {
    match std::env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| SchedulerError::Config(format!("{name} is not an integer: {value}"))),
        Err(_) => Ok(default),
    }
}

/// Scheduler configuration knobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum concurrent requests on the submission surface.
    pub submission_max_workers: usize,
    /// Maximum concurrent requests on the execution surface.
    pub execution_max_workers: usize,
    /// Maximum request body size on the submission surface.
    pub submission_max_message_length: usize,
    /// Maximum request body size on the execution surface.
    pub execution_max_message_length: usize,
    /// Capacity of each job queue in bytes.
    pub max_queue_bytes: usize,
    /// Role to the maximum number of queued jobs per token.
    pub max_concurrent_jobs: HashMap<String, usize>,
    /// Role to the maximum byte size of a submission request.
    pub max_job_bytes: HashMap<String, usize>,
}

impl SchedulerConfig {
    /// Load the configuration from environment variables, with defaults.
    pub fn from_env() -> SchedulerResult<Self> {
        let max_concurrent_jobs = HashMap::from([
            (
                "admin".to_string(),
                env_usize("SCHEDULER_MAX_CONCURRENT_JOBS_ADMIN", 1000)?,
            ),
            (
                "developer".to_string(),
                env_usize("SCHEDULER_MAX_CONCURRENT_JOBS_DEVELOPER", 10)?,
            ),
            (
                "guest".to_string(),
                env_usize("SCHEDULER_MAX_CONCURRENT_JOBS_GUEST", 5)?,
            ),
        ]);
        let max_job_bytes = HashMap::from([
            (
                "admin".to_string(),
                env_usize("SCHEDULER_MAX_JOB_BYTES_ADMIN", 10 * MIB)?,
            ),
            (
                "developer".to_string(),
                env_usize("SCHEDULER_MAX_JOB_BYTES_DEVELOPER", 10 * MIB)?,
            ),
            (
                "guest".to_string(),
                env_usize("SCHEDULER_MAX_JOB_BYTES_GUEST", MIB)?,
            ),
        ]);

        Ok(Self {
            submission_max_workers: env_usize("SCHEDULER_SUBMISSION_MAX_WORKERS", 100)?,
            execution_max_workers: env_usize("SCHEDULER_EXECUTION_MAX_WORKERS", 10)?,
            submission_max_message_length: env_usize(
                "SCHEDULER_SUBMISSION_MAX_MESSAGE_LENGTH",
                10 * MIB,
            )?,
            execution_max_message_length: env_usize(
                "SCHEDULER_EXECUTION_MAX_MESSAGE_LENGTH",
                10 * MIB,
            )?,
            max_queue_bytes: env_usize("SCHEDULER_MAX_QUEUE_BYTES", 100 * MIB)?,
            max_concurrent_jobs,
            max_job_bytes,
        })
    }
}
