//! Shared constants for the scheduler.

/// Days a job record is retained before the durable table expires it.
pub const JOB_EXPIRY_DAYS: i64 = 30;

/// Lifetime of a presigned URL for uploading a job result.
pub const UPLOAD_URL_EXPIRES_IN_SECONDS: u64 = 3600 * 3;

/// Lifetime of a presigned URL for downloading a job result.
pub const DOWNLOAD_URL_EXPIRES_IN_SECONDS: u64 = 180;

/// Default number of oldest entries a pop considers when ranking by priority.
pub const DEFAULT_MAX_JOBS_TO_CONSIDER: usize = 10;

/// Default cap on how long a job may wait before it is popped unconditionally.
pub const DEFAULT_MAX_WAITING_TIME_MINUTES: i64 = 30;

/// Queue key used when all backends are unified into a single queue.
pub const UNIFIED_BACKEND_KEY: &str = "all";
