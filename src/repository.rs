//! Job input/result objects in the blob store.
//!
//! Inputs live at `{job_id}.in.proto`, results at `{job_id}.out.proto.gz`.
//! Results are uploaded by the executor through presigned URLs; the
//! scheduler only generates the URLs and tags the finished object.

use chrono::{DateTime, Duration, FixedOffset};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{error, info};

use crate::clock::SharedClock;
use crate::constants::{DOWNLOAD_URL_EXPIRES_IN_SECONDS, UPLOAD_URL_EXPIRES_IN_SECONDS};
use crate::error::SchedulerResult;
use crate::job::metadata::JobMetadata;
use crate::stores::blob::BlobStore;

const PROGRAM_CONTENT_TYPE: &str = "application/protobuf";

fn input_key(job_id: &str) -> String {
    format!("{job_id}.in.proto")
}

fn result_key(job_id: &str) -> String {
    format!("{job_id}.out.proto.gz")
}

/// Access to job inputs and results stored as blobs.
pub struct JobRepository {
    store: Arc<dyn BlobStore>,
    clock: SharedClock,
}

impl JobRepository {
    pub fn new(store: Arc<dyn BlobStore>, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Check that the backing bucket is reachable.
    pub async fn bucket_exists(&self) -> bool {
        self.store.bucket_exists().await
    }

    /// Upload the input of a job.
    pub async fn upload_job_input(
        &self,
        program: &[u8],
        job_metadata: &JobMetadata,
    ) -> SchedulerResult<()> {
        info!("Uploading the job input (job ID: {}).", job_metadata.job_id);
        let tags = vec![
            ("token_role".to_string(), job_metadata.role.clone()),
            ("save_job".to_string(), job_metadata.save_job.to_string()),
            ("upload-status".to_string(), "complete".to_string()),
        ];
        self.store
            .put_object(
                &input_key(&job_metadata.job_id),
                program.to_vec(),
                PROGRAM_CONTENT_TYPE,
                &tags,
            )
            .await
    }

    /// Download the input of a job, or `None` if the download failed.
    pub async fn download_job_input(&self, job_id: &str) -> Option<Vec<u8>> {
        info!("Downloading the input of the job (job ID: {job_id}).");
        match self.store.get_object(&input_key(job_id)).await {
            Ok(program) => Some(program),
            Err(e) => {
                error!("Failed to download the job input (job ID: {job_id}): {e}");
                None
            }
        }
    }

    /// Generate a presigned URL for uploading the result of a job,
    /// returning the URL and its expiration time.
    pub async fn generate_upload_url(
        &self,
        job_id: &str,
    ) -> SchedulerResult<(String, DateTime<FixedOffset>)> {
        info!("Generating a presigned URL for uploading the result (job ID: {job_id}).");
        let expires_in = StdDuration::from_secs(UPLOAD_URL_EXPIRES_IN_SECONDS);
        let url = self
            .store
            .presigned_put_url(
                &result_key(job_id),
                PROGRAM_CONTENT_TYPE,
                Some("gzip"),
                expires_in,
            )
            .await?;
        let expires_at =
            self.clock.now() + Duration::seconds(UPLOAD_URL_EXPIRES_IN_SECONDS as i64);
        Ok((url, expires_at))
    }

    /// Generate a presigned URL for downloading the result of a job,
    /// returning the URL and its expiration time.
    pub async fn generate_download_url(
        &self,
        job_id: &str,
    ) -> SchedulerResult<(String, DateTime<FixedOffset>)> {
        info!("Generating a presigned URL for downloading the result (job ID: {job_id}).");
        let expires_in = StdDuration::from_secs(DOWNLOAD_URL_EXPIRES_IN_SECONDS);
        let url = self
            .store
            .presigned_get_url(&result_key(job_id), expires_in)
            .await?;
        let expires_at =
            self.clock.now() + Duration::seconds(DOWNLOAD_URL_EXPIRES_IN_SECONDS as i64);
        Ok((url, expires_at))
    }

    /// Put tags on the result of a job.
    ///
    /// The `upload-status` tag controls one-time uploads via a presigned
    /// URL.
    pub async fn put_tags_to_result(
        &self,
        job_id: &str,
        token_role: &str,
        save_job: bool,
    ) -> SchedulerResult<()> {
        info!("Putting tags to the job result (job ID: {job_id}).");
        let tags = vec![
            ("token_role".to_string(), token_role.to_string()),
            ("save_job".to_string(), save_job.to_string()),
            ("upload-status".to_string(), "complete".to_string()),
        ];
        self.store
            .put_object_tagging(&result_key(job_id), &tags)
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::{jst, ManualClock};
    use crate::job::metadata::{JobMetadataInit, StateSavePolicy};
    use crate::stores::blob::MemoryBlobStore;
    use chrono::TimeZone;

    fn fixture() -> (Arc<MemoryBlobStore>, JobRepository) {
        let store = Arc::new(MemoryBlobStore::new());
        let clock = Arc::new(ManualClock::new(
            jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap(),
        ));
        let repository = JobRepository::new(Arc::clone(&store) as Arc<dyn BlobStore>, clock);
        (store, repository)
    }

    fn metadata() -> JobMetadata {
        JobMetadata::new(
            JobMetadataInit {
                job_id: "job-1".to_string(),
                sdk_version: "1.0.0".to_string(),
                token: "tok".to_string(),
                role: "guest".to_string(),
                requested_backend: "emulator".to_string(),
                n_shots: 1,
                max_elapsed_s: 2,
                save_job: true,
                state_save_policy: StateSavePolicy::Unspecified,
                resource_squeezing_level: 0.0,
                scheduler_version: None,
            },
            jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_upload_and_download_input() {
        let (store, repository) = fixture();
        repository
            .upload_job_input(b"program", &metadata())
            .await
            .unwrap();

        assert!(store.contains_object("job-1.in.proto"));
        let tags = store.object_tags("job-1.in.proto").unwrap();
        assert!(tags.contains(&("token_role".to_string(), "guest".to_string())));
        assert!(tags.contains(&("save_job".to_string(), "true".to_string())));
        assert!(tags.contains(&("upload-status".to_string(), "complete".to_string())));

        assert_eq!(
            repository.download_job_input("job-1").await.unwrap(),
            b"program"
        );
        assert!(repository.download_job_input("job-2").await.is_none());
    }

    #[tokio::test]
    async fn test_upload_url_expiry() {
        let (_, repository) = fixture();
        let (url, expires_at) = repository.generate_upload_url("job-1").await.unwrap();
        assert!(url.contains("job-1.out.proto.gz"));
        let now = jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        assert_eq!(expires_at, now + Duration::seconds(3 * 3600));
    }

    #[tokio::test]
    async fn test_download_url_expiry() {
        let (_, repository) = fixture();
        let (url, expires_at) = repository.generate_download_url("job-1").await.unwrap();
        assert!(url.contains("job-1.out.proto.gz"));
        let now = jst().with_ymd_and_hms(2025, 4, 1, 12, 0, 0).unwrap();
        assert_eq!(expires_at, now + Duration::seconds(180));
    }

    #[tokio::test]
    async fn test_result_tagging() {
        let (store, repository) = fixture();
        store.seed_object("job-1.out.proto.gz", Vec::new());
        repository
            .put_tags_to_result("job-1", "developer", false)
            .await
            .unwrap();
        let tags = store.object_tags("job-1.out.proto.gz").unwrap();
        assert!(tags.contains(&("token_role".to_string(), "developer".to_string())));
        assert!(tags.contains(&("save_job".to_string(), "false".to_string())));
    }
}
