//! Error types for the scheduler.

use thiserror::Error;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Error types for scheduler operations
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A job with the same ID is already present in a queue
    #[error("failed to push job {0}: job ID already exists")]
    DuplicateJobId(String),

    /// Backend is not known to the scheduler
    #[error("{0} is not a supported backend.")]
    UnknownBackend(String),

    /// Role is not listed for the backend in the status document
    #[error("unknown role: '{role}' in backend '{backend}'")]
    UnknownRole { backend: String, role: String },

    /// Job does not exist in the durable table
    #[error("the item with job ID {0} does not exist in the database")]
    JobNotFound(String),

    /// Conditional put failed because the record already exists
    #[error("an item with the job ID {0} already exists in the database")]
    ItemExists(String),

    /// Conditional update failed because the record does not exist
    #[error("the item with job ID {0} does not exist in the database")]
    ItemMissing(String),

    /// Durable table failure
    #[error("durable table error: {0}")]
    Table(String),

    /// Blob store failure
    #[error("blob store error: {0}")]
    Storage(String),

    /// Parameter store failure
    #[error("parameter store error: {0}")]
    Parameter(String),

    /// Token service failure
    #[error("token service error: {0}")]
    TokenService(String),

    /// A durable item could not be decoded into job metadata
    #[error("invalid durable item: {0}")]
    MalformedItem(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}
