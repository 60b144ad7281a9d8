//! Durable job-metadata table.
//!
//! Key-value store with the job ID as primary key and one secondary index
//! on the `status` attribute. Items are maps of typed attribute values so
//! a record round-trips byte-for-byte through any backing store.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{SchedulerError, SchedulerResult};

/// A typed attribute value, the unit of durable-item encoding.
///
/// Enums and datetimes are stored as strings, numbers as their decimal
/// rendering, booleans natively, and absent optionals as `Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    /// String attribute (also enum names and RFC 3339 datetimes)
    S(String),
    /// Number attribute, kept as its decimal rendering
    N(String),
    /// Boolean attribute
    Bool(bool),
    /// Absent optional attribute
    Null,
}

/// A durable item: attribute name to typed value.
pub type TableItem = HashMap<String, AttrValue>;

/// The attribute holding the job ID (primary key).
pub const JOB_ID_ATTR: &str = "job_id";

/// The attribute backing the secondary index.
pub const STATUS_ATTR: &str = "status";

/// Durable table operations required by the scheduler.
#[async_trait]
pub trait JobTable: Send + Sync {
    /// Verify the table exists and is reachable.
    async fn ensure_table(&self) -> SchedulerResult<()>;

    /// Add an item, conditional on no item with the same job ID existing.
    ///
    /// An existing record fails with [`SchedulerError::ItemExists`] so the
    /// caller can protect the record that already owns the ID.
    async fn put_new_item(&self, item: TableItem) -> SchedulerResult<()>;

    /// Retrieve an item by job ID.
    async fn get_item(&self, job_id: &str) -> SchedulerResult<TableItem>;

    /// Retrieve every item with the given status via the secondary index.
    async fn query_by_status(&self, status: &str) -> SchedulerResult<Vec<TableItem>>;

    /// Update attributes of an item, conditional on the item existing.
    async fn update_item(&self, job_id: &str, updates: TableItem) -> SchedulerResult<()>;

    /// Update attributes of an item, conditional on its current status.
    ///
    /// Returns `Ok(false)` when the status condition did not hold, so a
    /// concurrent transition is observable rather than clobbered.
    async fn update_item_if_status(
        &self,
        job_id: &str,
        expected_status: &str,
        updates: TableItem,
    ) -> SchedulerResult<bool>;

    /// Check whether an item exists, optionally with a strongly
    /// consistent read.
    async fn contains_item(&self, job_id: &str, consistent_read: bool) -> SchedulerResult<bool>;
}

/// In-memory job table for the dev server and tests.
///
/// Failure injection flips the next matching operation into an error,
/// which is how tests exercise the unreliable-store paths.
#[derive(Default)]
pub struct MemoryJobTable {
    items: RwLock<HashMap<String, TableItem>>,
    fail_puts: AtomicBool,
    fail_updates: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryJobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent puts fail with a table error.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent updates fail with a table error.
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent reads fail with a table error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Insert an item directly, bypassing the conditional check.
    pub fn seed_item(&self, item: TableItem) {
        if let Some(AttrValue::S(job_id)) = item.get(JOB_ID_ATTR) {
            self.items.write().insert(job_id.clone(), item);
        }
    }

    /// Snapshot of an item, for assertions.
    pub fn item(&self, job_id: &str) -> Option<TableItem> {
        self.items.read().get(job_id).cloned()
    }

    /// String value of an item attribute, for assertions.
    pub fn item_attr_s(&self, job_id: &str, attr: &str) -> Option<String> {
        match self.items.read().get(job_id)?.get(attr)? {
            AttrValue::S(value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl JobTable for MemoryJobTable {
    async fn ensure_table(&self) -> SchedulerResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SchedulerError::Table("table is not reachable".to_string()));
        }
        Ok(())
    }

    async fn put_new_item(&self, item: TableItem) -> SchedulerResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(SchedulerError::Table("injected put failure".to_string()));
        }
        let Some(AttrValue::S(job_id)) = item.get(JOB_ID_ATTR).cloned() else {
            return Err(SchedulerError::Table(
                "item is missing the job_id attribute".to_string(),
            ));
        };
        let mut items = self.items.write();
        if items.contains_key(&job_id) {
            return Err(SchedulerError::ItemExists(job_id));
        }
        items.insert(job_id, item);
        Ok(())
    }

    async fn get_item(&self, job_id: &str) -> SchedulerResult<TableItem> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SchedulerError::Table("injected read failure".to_string()));
        }
        self.items
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))
    }

    async fn query_by_status(&self, status: &str) -> SchedulerResult<Vec<TableItem>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SchedulerError::Table("injected read failure".to_string()));
        }
        Ok(self
            .items
            .read()
            .values()
            .filter(|item| matches!(item.get(STATUS_ATTR), Some(AttrValue::S(s)) if s == status))
            .cloned()
            .collect())
    }

    async fn update_item(&self, job_id: &str, updates: TableItem) -> SchedulerResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SchedulerError::Table("injected update failure".to_string()));
        }
        let mut items = self.items.write();
        let Some(item) = items.get_mut(job_id) else {
            return Err(SchedulerError::ItemMissing(job_id.to_string()));
        };
        item.extend(updates);
        Ok(())
    }

    async fn update_item_if_status(
        &self,
        job_id: &str,
        expected_status: &str,
        updates: TableItem,
    ) -> SchedulerResult<bool> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(SchedulerError::Table("injected update failure".to_string()));
        }
        let mut items = self.items.write();
        let Some(item) = items.get_mut(job_id) else {
            return Err(SchedulerError::ItemMissing(job_id.to_string()));
        };
        let holds =
            matches!(item.get(STATUS_ATTR), Some(AttrValue::S(s)) if s == expected_status);
        if !holds {
            return Ok(false);
        }
        item.extend(updates);
        Ok(true)
    }

    async fn contains_item(&self, job_id: &str, _consistent_read: bool) -> SchedulerResult<bool> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(SchedulerError::Table("injected read failure".to_string()));
        }
        Ok(self.items.read().contains_key(job_id))
    }
}
