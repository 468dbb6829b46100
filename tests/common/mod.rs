//! Shared test doubles.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use task_audit::dispatch::{Dispatch, EngineState, TaskEngine};
use task_audit::error::{Error, Result};
use task_audit::model::{
    Change, Guard, NewRecord, RecordFilter, RecordId, TaskExecutionRecord, TaskHandle,
};
use task_audit::store::{AuditStore, MemoryStore};

/// Scriptable engine. Handles with no scripted state report `Unknown`.
#[derive(Default)]
pub struct FakeEngine {
    states: Mutex<HashMap<TaskHandle, EngineState>>,
    failing: Mutex<Vec<TaskHandle>>,
    retries: Mutex<Vec<(TaskHandle, Dispatch)>>,
    /// When set, `retry` issues a fresh handle instead of reusing the old one.
    pub fresh_handles: AtomicBool,
    /// Milliseconds `get_state` takes to answer.
    pub state_delay_ms: AtomicU64,
    next: AtomicU64,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1000),
            ..Self::default()
        }
    }

    pub fn set_state(&self, handle: &str, state: EngineState) {
        self.states
            .lock()
            .unwrap()
            .insert(TaskHandle::from(handle), state);
    }

    /// Make `get_state` fail for `handle`.
    pub fn fail_on(&self, handle: &str) {
        self.failing.lock().unwrap().push(TaskHandle::from(handle));
    }

    pub fn retries(&self) -> Vec<(TaskHandle, Dispatch)> {
        self.retries.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskEngine for FakeEngine {
    async fn submit(&self, _dispatch: &Dispatch) -> Result<TaskHandle> {
        let handle = TaskHandle::new(self.next.fetch_add(1, Ordering::SeqCst).to_string());
        self.states
            .lock()
            .unwrap()
            .insert(handle.clone(), EngineState::Pending);
        Ok(handle)
    }

    async fn get_state(&self, handle: &TaskHandle) -> Result<EngineState> {
        let delay = self.state_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        if self.failing.lock().unwrap().contains(handle) {
            return Err(Error::Engine(format!("broker unreachable for {handle}")));
        }
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(handle)
            .copied()
            .unwrap_or(EngineState::Unknown))
    }

    async fn retry(&self, handle: &TaskHandle, dispatch: &Dispatch) -> Result<TaskHandle> {
        self.retries
            .lock()
            .unwrap()
            .push((handle.clone(), dispatch.clone()));
        if self.fresh_handles.load(Ordering::SeqCst) {
            return self.submit(dispatch).await;
        }
        self.set_state(handle.as_str(), EngineState::Pending);
        Ok(handle.clone())
    }
}

/// Memory store whose operations can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_create: AtomicBool,
    pub fail_update: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn unavailable() -> Error {
    Error::Other("audit store unavailable".to_string())
}

#[async_trait]
impl AuditStore for FlakyStore {
    async fn create(&self, new: NewRecord) -> Result<TaskExecutionRecord> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.create(new).await
    }

    async fn get(&self, id: RecordId) -> Result<TaskExecutionRecord> {
        self.inner.get(id).await
    }

    async fn update(
        &self,
        id: RecordId,
        guard: Guard,
        change: Change,
    ) -> Result<Option<TaskExecutionRecord>> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.update(id, guard, change).await
    }

    async fn set_retry_handle(&self, id: RecordId, handle: &TaskHandle) -> Result<()> {
        self.inner.set_retry_handle(id, handle).await
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<TaskExecutionRecord>> {
        self.inner.find_stale(cutoff).await
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<TaskExecutionRecord>> {
        self.inner.list(filter).await
    }
}

pub fn new_record(handle: &str, kind: &str, payload: &str) -> NewRecord {
    NewRecord {
        task_handle: TaskHandle::from(handle),
        task_kind: kind.to_string(),
        correlation_id: uuid::Uuid::now_v7(),
        request_payload: payload.to_string(),
    }
}
