//! Job metadata and its durable-item encoding.

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::api::models::{JobExecutionVersion, JobTimestamps};
use crate::constants::JOB_EXPIRY_DAYS;
use crate::error::{SchedulerError, SchedulerResult};
use crate::stores::table::{AttrValue, TableItem};

/// Job status enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Unspecified,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Unspecified => "UNSPECIFIED",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
            JobStatus::Timeout => "TIMEOUT",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "UNSPECIFIED" => Some(JobStatus::Unspecified),
            "QUEUED" => Some(JobStatus::Queued),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            "TIMEOUT" => Some(JobStatus::Timeout),
            _ => None,
        }
    }

    /// Terminal states are sticky; no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Timeout
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State save policy enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateSavePolicy {
    #[default]
    Unspecified,
    All,
    FirstOnly,
    None,
}

impl StateSavePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateSavePolicy::Unspecified => "UNSPECIFIED",
            StateSavePolicy::All => "ALL",
            StateSavePolicy::FirstOnly => "FIRST_ONLY",
            StateSavePolicy::None => "NONE",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "UNSPECIFIED" => Some(StateSavePolicy::Unspecified),
            "ALL" => Some(StateSavePolicy::All),
            "FIRST_ONLY" => Some(StateSavePolicy::FirstOnly),
            "NONE" => Some(StateSavePolicy::None),
            _ => None,
        }
    }
}

/// Immutable fields fixed when a job is submitted.
#[derive(Debug, Clone)]
pub struct JobMetadataInit {
    pub job_id: String,
    pub sdk_version: String,
    pub token: String,
    pub role: String,
    pub requested_backend: String,
    pub n_shots: u64,
    pub max_elapsed_s: u64,
    pub save_job: bool,
    pub state_save_policy: StateSavePolicy,
    pub resource_squeezing_level: f64,
    pub scheduler_version: Option<String>,
}

/// Everything the scheduler knows about one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobMetadata {
    pub job_id: String,
    pub sdk_version: String,

    // Token information
    pub token: String,
    pub role: String,

    // Execution settings
    pub requested_backend: String,
    pub n_shots: u64,
    pub max_elapsed_s: u64,

    // Job management options
    pub save_job: bool,

    // Simulation settings
    pub state_save_policy: StateSavePolicy,
    pub resource_squeezing_level: f64,

    pub status: JobStatus,
    pub status_code: String,
    pub status_message: String,

    // Execution result
    pub actual_backend_name: Option<String>,
    pub raw_size_bytes: Option<u64>,
    pub encoded_size_bytes: Option<u64>,

    // Execution version
    pub quantum_computer_version: Option<String>,
    pub physical_lab_version: Option<String>,
    pub scheduler_version: Option<String>,
    pub simulator_version: Option<String>,

    // Timestamps
    pub submitted_at: Option<DateTime<FixedOffset>>,
    pub queued_at: Option<DateTime<FixedOffset>>,
    pub dequeued_at: Option<DateTime<FixedOffset>>,
    pub compile_started_at: Option<DateTime<FixedOffset>>,
    pub compile_finished_at: Option<DateTime<FixedOffset>>,
    pub execution_started_at: Option<DateTime<FixedOffset>>,
    pub execution_finished_at: Option<DateTime<FixedOffset>>,
    pub finished_at: Option<DateTime<FixedOffset>>,
    pub job_expiry: Option<DateTime<FixedOffset>>,
}

/// Encode a datetime the way the durable table stores it.
pub fn datetime_attr(value: DateTime<FixedOffset>) -> AttrValue {
    AttrValue::S(value.to_rfc3339())
}

fn opt_string_attr(value: &Option<String>) -> AttrValue {
    match value {
        Some(value) => AttrValue::S(value.clone()),
        None => AttrValue::Null,
    }
}

fn opt_u64_attr(value: Option<u64>) -> AttrValue {
    match value {
        Some(value) => AttrValue::N(value.to_string()),
        None => AttrValue::Null,
    }
}

/// Encode an optional datetime the way the durable table stores it.
pub fn opt_datetime_attr(value: Option<DateTime<FixedOffset>>) -> AttrValue {
    match value {
        Some(value) => datetime_attr(value),
        None => AttrValue::Null,
    }
}

fn require<'a>(item: &'a TableItem, field: &str) -> SchedulerResult<&'a AttrValue> {
    item.get(field)
        .ok_or_else(|| SchedulerError::MalformedItem(format!("missing field: {field}")))
}

fn decode_string(item: &TableItem, field: &str) -> SchedulerResult<String> {
    match require(item, field)? {
        AttrValue::S(value) => Ok(value.clone()),
        other => Err(SchedulerError::MalformedItem(format!(
            "field {field} is not a string: {other:?}"
        ))),
    }
}

fn decode_opt_string(item: &TableItem, field: &str) -> SchedulerResult<Option<String>> {
    match require(item, field)? {
        AttrValue::S(value) => Ok(Some(value.clone())),
        AttrValue::Null => Ok(None),
        other => Err(SchedulerError::MalformedItem(format!(
            "field {field} is not a string: {other:?}"
        ))),
    }
}

fn decode_bool(item: &TableItem, field: &str) -> SchedulerResult<bool> {
    match require(item, field)? {
        AttrValue::Bool(value) => Ok(*value),
        other => Err(SchedulerError::MalformedItem(format!(
            "field {field} is not a boolean: {other:?}"
        ))),
    }
}

fn decode_u64(item: &TableItem, field: &str) -> SchedulerResult<u64> {
    match require(item, field)? {
        AttrValue::N(value) => value.parse().map_err(|_| {
            SchedulerError::MalformedItem(format!("field {field} is not an integer: {value}"))
        }),
        other => Err(SchedulerError::MalformedItem(format!(
            "field {field} is not a number: {other:?}"
        ))),
    }
}

fn decode_opt_u64(item: &TableItem, field: &str) -> SchedulerResult<Option<u64>> {
    match require(item, field)? {
        AttrValue::N(value) => value.parse().map(Some).map_err(|_| {
            SchedulerError::MalformedItem(format!("field {field} is not an integer: {value}"))
        }),
        AttrValue::Null => Ok(None),
        other => Err(SchedulerError::MalformedItem(format!(
            "field {field} is not a number: {other:?}"
        ))),
    }
}

fn decode_f64(item: &TableItem, field: &str) -> SchedulerResult<f64> {
    match require(item, field)? {
        AttrValue::N(value) => value.parse().map_err(|_| {
            SchedulerError::MalformedItem(format!("field {field} is not a number: {value}"))
        }),
        other => Err(SchedulerError::MalformedItem(format!(
            "field {field} is not a number: {other:?}"
        ))),
    }
}

fn decode_opt_datetime(
    item: &TableItem,
    field: &str,
) -> SchedulerResult<Option<DateTime<FixedOffset>>> {
    match require(item, field)? {
        AttrValue::S(value) => DateTime::parse_from_rfc3339(value).map(Some).map_err(|e| {
            SchedulerError::MalformedItem(format!("field {field} is not a datetime: {e}"))
        }),
        AttrValue::Null => Ok(None),
        other => Err(SchedulerError::MalformedItem(format!(
            "field {field} is not a datetime: {other:?}"
        ))),
    }
}

impl JobMetadata {
    /// Build the initial metadata for a freshly submitted job.
    ///
    /// `submitted_at` is the construction time and the record expires 30
    /// days later unless finalize overwrites the expiry.
    pub fn new(init: JobMetadataInit, now: DateTime<FixedOffset>) -> Self {
        Self {
            job_id: init.job_id,
            sdk_version: init.sdk_version,
            token: init.token,
            role: init.role,
            requested_backend: init.requested_backend,
            n_shots: init.n_shots,
            max_elapsed_s: init.max_elapsed_s,
            save_job: init.save_job,
            state_save_policy: init.state_save_policy,
            resource_squeezing_level: init.resource_squeezing_level,
            status: JobStatus::Unspecified,
            status_code: String::new(),
            status_message: String::new(),
            actual_backend_name: None,
            raw_size_bytes: None,
            encoded_size_bytes: None,
            quantum_computer_version: None,
            physical_lab_version: None,
            scheduler_version: init.scheduler_version,
            simulator_version: None,
            submitted_at: Some(now),
            queued_at: None,
            dequeued_at: None,
            compile_started_at: None,
            compile_finished_at: None,
            execution_started_at: None,
            execution_finished_at: None,
            finished_at: None,
            job_expiry: Some(now + Duration::days(JOB_EXPIRY_DAYS)),
        }
    }

    /// Convert the metadata to a durable-table item.
    pub fn to_item(&self) -> TableItem {
        let mut item = TableItem::new();
        item.insert("job_id".into(), AttrValue::S(self.job_id.clone()));
        item.insert("sdk_version".into(), AttrValue::S(self.sdk_version.clone()));
        item.insert("token".into(), AttrValue::S(self.token.clone()));
        item.insert("role".into(), AttrValue::S(self.role.clone()));
        item.insert(
            "requested_backend".into(),
            AttrValue::S(self.requested_backend.clone()),
        );
        item.insert("n_shots".into(), AttrValue::N(self.n_shots.to_string()));
        item.insert(
            "max_elapsed_s".into(),
            AttrValue::N(self.max_elapsed_s.to_string()),
        );
        item.insert("save_job".into(), AttrValue::Bool(self.save_job));
        item.insert(
            "state_save_policy".into(),
            AttrValue::S(self.state_save_policy.as_str().to_string()),
        );
        item.insert(
            "resource_squeezing_level".into(),
            AttrValue::N(self.resource_squeezing_level.to_string()),
        );
        item.insert("status".into(), AttrValue::S(self.status.as_str().to_string()));
        item.insert("status_code".into(), AttrValue::S(self.status_code.clone()));
        item.insert(
            "status_message".into(),
            AttrValue::S(self.status_message.clone()),
        );
        item.insert(
            "actual_backend_name".into(),
            opt_string_attr(&self.actual_backend_name),
        );
        item.insert("raw_size_bytes".into(), opt_u64_attr(self.raw_size_bytes));
        item.insert(
            "encoded_size_bytes".into(),
            opt_u64_attr(self.encoded_size_bytes),
        );
        item.insert(
            "quantum_computer_version".into(),
            opt_string_attr(&self.quantum_computer_version),
        );
        item.insert(
            "physical_lab_version".into(),
            opt_string_attr(&self.physical_lab_version),
        );
        item.insert(
            "scheduler_version".into(),
            opt_string_attr(&self.scheduler_version),
        );
        item.insert(
            "simulator_version".into(),
            opt_string_attr(&self.simulator_version),
        );
        item.insert("submitted_at".into(), opt_datetime_attr(self.submitted_at));
        item.insert("queued_at".into(), opt_datetime_attr(self.queued_at));
        item.insert("dequeued_at".into(), opt_datetime_attr(self.dequeued_at));
        item.insert(
            "compile_started_at".into(),
            opt_datetime_attr(self.compile_started_at),
        );
        item.insert(
            "compile_finished_at".into(),
            opt_datetime_attr(self.compile_finished_at),
        );
        item.insert(
            "execution_started_at".into(),
            opt_datetime_attr(self.execution_started_at),
        );
        item.insert(
            "execution_finished_at".into(),
            opt_datetime_attr(self.execution_finished_at),
        );
        item.insert("finished_at".into(), opt_datetime_attr(self.finished_at));
        item.insert("job_expiry".into(), opt_datetime_attr(self.job_expiry));
        item
    }

    /// Reconstruct metadata from a durable-table item produced by
    /// [`JobMetadata::to_item`].
    pub fn from_item(item: &TableItem) -> SchedulerResult<Self> {
        let status_name = decode_string(item, "status")?;
        let status = JobStatus::parse(&status_name).ok_or_else(|| {
            SchedulerError::MalformedItem(format!("unknown job status: {status_name}"))
        })?;
        let policy_name = decode_string(item, "state_save_policy")?;
        let state_save_policy = StateSavePolicy::parse(&policy_name).ok_or_else(|| {
            SchedulerError::MalformedItem(format!("unknown state save policy: {policy_name}"))
        })?;

        Ok(Self {
            job_id: decode_string(item, "job_id")?,
            sdk_version: decode_string(item, "sdk_version")?,
            token: decode_string(item, "token")?,
            role: decode_string(item, "role")?,
            requested_backend: decode_string(item, "requested_backend")?,
            n_shots: decode_u64(item, "n_shots")?,
            max_elapsed_s: decode_u64(item, "max_elapsed_s")?,
            save_job: decode_bool(item, "save_job")?,
            state_save_policy,
            resource_squeezing_level: decode_f64(item, "resource_squeezing_level")?,
            status,
            status_code: decode_string(item, "status_code")?,
            status_message: decode_string(item, "status_message")?,
            actual_backend_name: decode_opt_string(item, "actual_backend_name")?,
            raw_size_bytes: decode_opt_u64(item, "raw_size_bytes")?,
            encoded_size_bytes: decode_opt_u64(item, "encoded_size_bytes")?,
            quantum_computer_version: decode_opt_string(item, "quantum_computer_version")?,
            physical_lab_version: decode_opt_string(item, "physical_lab_version")?,
            scheduler_version: decode_opt_string(item, "scheduler_version")?,
            simulator_version: decode_opt_string(item, "simulator_version")?,
            submitted_at: decode_opt_datetime(item, "submitted_at")?,
            queued_at: decode_opt_datetime(item, "queued_at")?,
            dequeued_at: decode_opt_datetime(item, "dequeued_at")?,
            compile_started_at: decode_opt_datetime(item, "compile_started_at")?,
            compile_finished_at: decode_opt_datetime(item, "compile_finished_at")?,
            execution_started_at: decode_opt_datetime(item, "execution_started_at")?,
            execution_finished_at: decode_opt_datetime(item, "execution_finished_at")?,
            finished_at: decode_opt_datetime(item, "finished_at")?,
            job_expiry: decode_opt_datetime(item, "job_expiry")?,
        })
    }

    /// Execution version block for status/result responses.
    pub fn execution_version(&self) -> JobExecutionVersion {
        JobExecutionVersion {
            physical_lab_version: self.physical_lab_version.clone(),
            scheduler_version: self.scheduler_version.clone(),
            simulator_version: self.simulator_version.clone(),
        }
    }

    /// Timestamp block for status/result responses.
    pub fn timestamps(&self) -> JobTimestamps {
        JobTimestamps {
            submitted_at: self.submitted_at,
            queued_at: self.queued_at,
            dequeued_at: self.dequeued_at,
            compile_started_at: self.compile_started_at,
            compile_finished_at: self.compile_finished_at,
            execution_started_at: self.execution_started_at,
            execution_finished_at: self.execution_finished_at,
            finished_at: self.finished_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::jst;
    use chrono::TimeZone;

    fn init(job_id: &str) -> JobMetadataInit {
        JobMetadataInit {
            job_id: job_id.to_string(),
            sdk_version: "1.2.3".to_string(),
            token: "tok".to_string(),
            role: "guest".to_string(),
            requested_backend: "emulator".to_string(),
            n_shots: 1024,
            max_elapsed_s: 2,
            save_job: true,
            state_save_policy: StateSavePolicy::FirstOnly,
            resource_squeezing_level: 0.5,
            scheduler_version: Some("0.4.0".to_string()),
        }
    }

    #[test]
    fn test_new_sets_submitted_at_and_expiry() {
        let now = jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let metadata = JobMetadata::new(init("a"), now);
        assert_eq!(metadata.status, JobStatus::Unspecified);
        assert_eq!(metadata.submitted_at, Some(now));
        assert_eq!(metadata.job_expiry, Some(now + Duration::days(30)));
        assert_eq!(metadata.queued_at, None);
    }

    #[test]
    fn test_item_roundtrip() {
        let now = jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let mut metadata = JobMetadata::new(init("a"), now);
        metadata.status = JobStatus::Queued;
        metadata.queued_at = Some(now + Duration::seconds(1));
        metadata.actual_backend_name = Some("emulator-2".to_string());
        metadata.raw_size_bytes = Some(4096);

        let decoded = JobMetadata::from_item(&metadata.to_item()).unwrap();
        assert_eq!(decoded, metadata);
    }

    #[test]
    fn test_from_item_missing_field() {
        let now = jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let mut item = JobMetadata::new(init("a"), now).to_item();
        item.remove("queued_at");
        let err = JobMetadata::from_item(&item).unwrap_err();
        assert!(err.to_string().contains("queued_at"));
    }

    #[test]
    fn test_from_item_rejects_unknown_status() {
        let now = jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        let mut item = JobMetadata::new(init("a"), now).to_item();
        item.insert("status".into(), AttrValue::S("EXPLODED".into()));
        assert!(JobMetadata::from_item(&item).is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Timeout.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Unspecified.is_terminal());
    }

    #[test]
    fn test_status_names_roundtrip() {
        for status in [
            JobStatus::Unspecified,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
            JobStatus::Timeout,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }
}
