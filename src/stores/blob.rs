//! Blob store for job inputs and results.
//!
//! The scheduler never streams result bytes itself; it uploads job inputs
//! and hands out presigned URLs for everything else.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{SchedulerError, SchedulerResult};

/// Blob store operations required by the scheduler.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Check that the backing bucket exists and is reachable.
    async fn bucket_exists(&self) -> bool;

    /// Store an object with a content type and a tag set.
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        tags: &[(String, String)],
    ) -> SchedulerResult<()>;

    /// Fetch an object's bytes.
    async fn get_object(&self, key: &str) -> SchedulerResult<Vec<u8>>;

    /// Replace the tag set of an existing object.
    async fn put_object_tagging(
        &self,
        key: &str,
        tags: &[(String, String)],
    ) -> SchedulerResult<()>;

    /// Generate a presigned PUT URL for the given key.
    async fn presigned_put_url(
        &self,
        key: &str,
        content_type: &str,
        content_encoding: Option<&str>,
        expires_in: Duration,
    ) -> SchedulerResult<String>;

    /// Generate a presigned GET URL for the given key.
    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> SchedulerResult<String>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    body: Vec<u8>,
    content_type: String,
    tags: Vec<(String, String)>,
}

/// In-memory blob store for the dev server and tests.
///
/// Presigned URLs use a `memory://` scheme; they are opaque to the
/// scheduler, which only passes them through.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
    fail_urls: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_urls(&self, fail: bool) {
        self.fail_urls.store(fail, Ordering::SeqCst);
    }

    /// Whether an object exists, for assertions.
    pub fn contains_object(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    /// Tag set of an object, for assertions.
    pub fn object_tags(&self, key: &str) -> Option<Vec<(String, String)>> {
        self.objects.read().get(key).map(|object| object.tags.clone())
    }

    /// Store an object directly, for test fixtures.
    pub fn seed_object(&self, key: &str, body: Vec<u8>) {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: "application/protobuf".to_string(),
                tags: Vec::new(),
            },
        );
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn bucket_exists(&self) -> bool {
        true
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
        tags: &[(String, String)],
    ) -> SchedulerResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SchedulerError::Storage("injected put failure".to_string()));
        }
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
                tags: tags.to_vec(),
            },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> SchedulerResult<Vec<u8>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(SchedulerError::Storage("injected get failure".to_string()));
        }
        self.objects
            .read()
            .get(key)
            .map(|object| object.body.clone())
            .ok_or_else(|| SchedulerError::Storage(format!("no such object: {key}")))
    }

    async fn put_object_tagging(
        &self,
        key: &str,
        tags: &[(String, String)],
    ) -> SchedulerResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SchedulerError::Storage("injected tagging failure".to_string()));
        }
        let mut objects = self.objects.write();
        let Some(object) = objects.get_mut(key) else {
            return Err(SchedulerError::Storage(format!("no such object: {key}")));
        };
        object.tags = tags.to_vec();
        Ok(())
    }

    async fn presigned_put_url(
        &self,
        key: &str,
        _content_type: &str,
        _content_encoding: Option<&str>,
        expires_in: Duration,
    ) -> SchedulerResult<String> {
        if self.fail_urls.load(Ordering::SeqCst) {
            return Err(SchedulerError::Storage("injected presign failure".to_string()));
        }
        Ok(format!(
            "memory://upload/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }

    async fn presigned_get_url(&self, key: &str, expires_in: Duration) -> SchedulerResult<String> {
        if self.fail_urls.load(Ordering::SeqCst) {
            return Err(SchedulerError::Storage("injected presign failure".to_string()));
        }
        Ok(format!(
            "memory://download/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }
}
