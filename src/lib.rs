//! Priority job scheduler for a photonic quantum computing cloud.
//!
//! This crate provides a scheduler that:
//! - Accepts jobs on a submission surface and hands them to backend
//!   workers on an execution surface
//! - Ranks queued jobs by role, timeout, age, and per-token fair share
//! - Keeps job metadata consistent between in-memory queues and a
//!   durable table, and recovers both on startup
//! - Delegates payload bytes to a blob store via presigned URLs

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod api;
pub mod backend;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod job;
pub mod messages;
pub mod priority;
pub mod queue;
pub mod repository;
pub mod stores;

pub use backend::{BackendAvailability, BackendStatusView, ServiceStatus};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use job::{JobManager, JobManagerConfig, JobMetadata, JobStatus, StateSavePolicy};
pub use messages::{get_status_message, StatusMessage};
pub use priority::{BurstScoreTable, JobPriority, PriorityConfig, PriorityFactorWeights};
pub use queue::{JobQueue, JobQueueContainer, QueueSettings};
pub use repository::JobRepository;
