//! Audit log store contract and an in-process implementation.
//!
//! The store is the single source of truth for execution records. Postgres
//! implements it in [`crate::db`]; [`MemoryStore`] backs tests and local runs.
//! Every update is atomic per record and guarded, so the recorder and the
//! monitor can race on the same row without clobbering each other.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::model::{
    Change, Guard, NewRecord, RecordFilter, RecordId, Status, TaskExecutionRecord, TaskHandle,
};

#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Insert a pending record for an execution that is about to start.
    async fn create(&self, new: NewRecord) -> Result<TaskExecutionRecord>;

    /// Fetch a record by id.
    async fn get(&self, id: RecordId) -> Result<TaskExecutionRecord>;

    /// Apply `change` if `guard` still holds. `Ok(None)` means another
    /// writer got there first and nothing was written.
    async fn update(
        &self,
        id: RecordId,
        guard: Guard,
        change: Change,
    ) -> Result<Option<TaskExecutionRecord>>;

    /// Remember the handle under which the task was re-issued.
    async fn set_retry_handle(&self, id: RecordId, handle: &TaskHandle) -> Result<()>;

    /// Pending or retryable-failed records created before `cutoff`, oldest first.
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<TaskExecutionRecord>>;

    /// Records matching `filter`, newest first.
    async fn list(&self, filter: &RecordFilter) -> Result<Vec<TaskExecutionRecord>>;
}

/// Check a guard against the current record.
pub(crate) fn guard_holds(guard: Guard, record: &TaskExecutionRecord) -> bool {
    match guard {
        Guard::Pending => record.status == Status::Pending,
        Guard::Version(v) => record.version == v,
    }
}

/// In-memory store. Records live as long as the value does.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: i64,
    records: BTreeMap<RecordId, TaskExecutionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Other("memory store lock poisoned".to_string()))
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn create(&self, new: NewRecord) -> Result<TaskExecutionRecord> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let now = Utc::now();
        let record = TaskExecutionRecord {
            id: RecordId(inner.next_id),
            task_handle: new.task_handle,
            task_kind: new.task_kind,
            correlation_id: new.correlation_id,
            request_payload: new.request_payload,
            status: Status::Pending,
            completed: false,
            retryable: false,
            remarks: String::new(),
            retry_handle: None,
            reclaim_count: 0,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: RecordId) -> Result<TaskExecutionRecord> {
        self.lock()?
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("task execution record {id}")))
    }

    async fn update(
        &self,
        id: RecordId,
        guard: Guard,
        change: Change,
    ) -> Result<Option<TaskExecutionRecord>> {
        let mut inner = self.lock()?;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("task execution record {id}")))?;

        if !guard_holds(guard, record) {
            return Ok(None);
        }
        change.apply(record, Utc::now());
        Ok(Some(record.clone()))
    }

    async fn set_retry_handle(&self, id: RecordId, handle: &TaskHandle) -> Result<()> {
        let mut inner = self.lock()?;
        let record = inner
            .records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("task execution record {id}")))?;
        record.retry_handle = Some(handle.clone());
        record.version += 1;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<TaskExecutionRecord>> {
        let inner = self.lock()?;
        let mut stale: Vec<_> = inner
            .records
            .values()
            .filter(|r| r.is_reconcilable() && r.created_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|r| (r.created_at, r.id));
        Ok(stale)
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<TaskExecutionRecord>> {
        let inner = self.lock()?;
        Ok(inner
            .records
            .values()
            .rev()
            .filter(|r| filter.matches(r))
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
