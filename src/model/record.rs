//! Task execution records: one row per dispatched unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Surrogate key assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Opaque identifier issued by the task engine for one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(pub String);

impl TaskHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for TaskHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TaskHandle {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Audit status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Execution started (or was re-armed) and no terminal update landed yet.
    Pending,
    /// Terminal success.
    Completed,
    /// Terminal failure; see `retryable`.
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Completed => "completed",
            Status::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "completed" => Ok(Status::Completed),
            "failed" => Ok(Status::Failed),
            other => Err(crate::error::Error::Other(format!(
                "unknown record status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Durable audit entry for one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecutionRecord {
    pub id: RecordId,

    /// Engine handle of the attempt that created this record.
    pub task_handle: TaskHandle,

    /// Task kind, used to re-dispatch the work on reclaim.
    pub task_kind: String,

    /// Groups every attempt of one logical task.
    pub correlation_id: Uuid,

    /// Encoded call arguments. Never rewritten.
    pub request_payload: String,

    pub status: Status,

    /// Mirrors `status == Completed`.
    pub completed: bool,

    /// Failure was transient or exhausted the engine's retries.
    pub retryable: bool,

    /// Description of the last failure. Empty otherwise.
    pub remarks: String,

    /// Handle of the attempt the monitor last re-issued, if any.
    pub retry_handle: Option<TaskHandle>,

    /// Times the monitor has re-armed this record.
    pub reclaim_count: u32,

    /// Bumped on every write; used for optimistic updates.
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskExecutionRecord {
    /// The handle the engine should be asked about: the latest re-issued
    /// attempt, falling back to the original.
    pub fn effective_handle(&self) -> &TaskHandle {
        self.retry_handle.as_ref().unwrap_or(&self.task_handle)
    }

    /// Pending, or failed in a way the monitor may recover from.
    pub fn is_reconcilable(&self) -> bool {
        match self.status {
            Status::Pending => true,
            Status::Failed => self.retryable,
            Status::Completed => false,
        }
    }
}

/// Fields supplied when an execution starts.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub task_handle: TaskHandle,
    pub task_kind: String,
    pub correlation_id: Uuid,
    pub request_payload: String,
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// Precondition an update must satisfy to be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// Record is still pending. Used for terminal writes after execution.
    Pending,
    /// Record has not been written since it was read at this version.
    Version(i64),
}

/// A status change applied to one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Terminal success. Clears remarks.
    Complete,
    /// Terminal failure.
    Fail { retryable: bool, remarks: String },
    /// Back to pending before the task is re-issued.
    Rearm,
    /// Reclaim budget spent; stop reconciling this record.
    Abandon { remarks: String },
}

impl Change {
    /// Status the record ends up in.
    pub fn target(&self) -> Status {
        match self {
            Change::Complete => Status::Completed,
            Change::Fail { .. } | Change::Abandon { .. } => Status::Failed,
            Change::Rearm => Status::Pending,
        }
    }

    /// Apply the change to an in-memory record. Stores use this to keep the
    /// `status`/`completed` pairing consistent.
    pub fn apply(&self, record: &mut TaskExecutionRecord, now: DateTime<Utc>) {
        record.status = self.target();
        record.completed = record.status == Status::Completed;
        match self {
            Change::Complete => {
                record.retryable = false;
                record.remarks.clear();
            }
            Change::Fail { retryable, remarks } => {
                record.retryable = *retryable;
                record.remarks = remarks.clone();
            }
            Change::Rearm => {
                record.retryable = false;
                record.reclaim_count += 1;
            }
            Change::Abandon { remarks } => {
                record.retryable = false;
                record.remarks = remarks.clone();
            }
        }
        record.version += 1;
        record.updated_at = now;
    }
}

/// Query for listing records.
#[derive(Debug, Clone)]
pub struct RecordFilter {
    pub status: Option<Status>,
    pub correlation_id: Option<Uuid>,
    pub task_handle: Option<TaskHandle>,
    pub limit: i64,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self {
            status: None,
            correlation_id: None,
            task_handle: None,
            limit: 50,
        }
    }
}

impl RecordFilter {
    pub fn matches(&self, record: &TaskExecutionRecord) -> bool {
        self.status.is_none_or(|s| record.status == s)
            && self.correlation_id.is_none_or(|c| record.correlation_id == c)
            && self
                .task_handle
                .as_ref()
                .is_none_or(|h| &record.task_handle == h)
    }
}
