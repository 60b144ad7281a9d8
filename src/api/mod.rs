//! RPC surfaces of the scheduler.
//!
//! Transport-neutral request/response models plus the submission and
//! execution facades, mounted on axum routers by [`server`].

pub mod execution;
pub mod models;
pub mod server;
pub mod submission;

pub use execution::ExecutionApi;
pub use submission::SubmissionApi;
