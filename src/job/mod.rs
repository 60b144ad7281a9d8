//! Job records and the job manager.

pub mod manager;
pub mod metadata;

pub use manager::{JobManager, JobManagerConfig};
pub use metadata::{JobMetadata, JobMetadataInit, JobStatus, StateSavePolicy};
