//! Configuration parameter store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{SchedulerError, SchedulerResult};

/// Named-parameter lookup, e.g. the backend-status TOML document.
#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// Fetch a parameter value, `None` when the parameter does not exist.
    async fn get_parameter(&self, name: &str) -> SchedulerResult<Option<String>>;
}

/// In-memory parameter store for the dev server and tests.
#[derive(Default)]
pub struct MemoryParameterStore {
    values: RwLock<HashMap<String, String>>,
    fail_reads: AtomicBool,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a parameter value.
    pub fn set(&self, name: &str, value: &str) {
        self.values
            .write()
            .insert(name.to_string(), value.to_string());
    }

    /// Remove a parameter.
    pub fn remove(&self, name: &str) {
        self.values.write().remove(name);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get_parameter(&self, name: &str) -> SchedulerResult<Option<String>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SchedulerError::Parameter(
                "injected read failure".to_string(),
            ));
        }
        Ok(self.values.read().get(name).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryParameterStore::new();
        assert_eq!(store.get_parameter("missing").await.unwrap(), None);
        store.set("key", "value");
        assert_eq!(
            store.get_parameter("key").await.unwrap(),
            Some("value".to_string())
        );
    }
}
