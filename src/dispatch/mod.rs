//! Port to the external task engine.
//!
//! The engine owns running tasks: queueing, worker assignment, per-task
//! retry with backoff. The audit subsystem only asks it for a task's state
//! and, when a task was lost, asks it to run the task again.

pub mod pgmq;

pub use self::pgmq::PgmqEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::model::TaskHandle;

/// The engine's view of one task handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    /// Queued, waiting for a worker.
    Pending,
    /// A worker holds it.
    Running,
    Success,
    Failure,
    /// The engine has no record of the handle.
    Unknown,
}

impl EngineState {
    /// Queued or being worked on; the audit log should not interfere.
    pub fn is_in_flight(self) -> bool {
        matches!(self, EngineState::Pending | EngineState::Running)
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineState::Pending => "PENDING",
            EngineState::Running => "RUNNING",
            EngineState::Success => "SUCCESS",
            EngineState::Failure => "FAILURE",
            EngineState::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Everything the engine needs to (re)run a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub kind: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub correlation_id: Uuid,
}

impl Dispatch {
    /// A new logical task with a fresh correlation id.
    pub fn new(kind: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            args,
            correlation_id: Uuid::now_v7(),
        }
    }

    /// Rebuild a dispatch from an audit record so a lost task can be re-sent.
    /// A payload that no longer parses is passed through as a string.
    pub fn from_record(record: &crate::model::TaskExecutionRecord) -> Self {
        let args = serde_json::from_str(&record.request_payload)
            .unwrap_or_else(|_| serde_json::Value::String(record.request_payload.clone()));
        Self {
            kind: record.task_kind.clone(),
            args,
            correlation_id: record.correlation_id,
        }
    }
}

#[async_trait]
pub trait TaskEngine: Send + Sync {
    /// Enqueue a task. Returns the handle of the new attempt.
    async fn submit(&self, dispatch: &Dispatch) -> Result<TaskHandle>;

    /// Current state of a handle.
    async fn get_state(&self, handle: &TaskHandle) -> Result<EngineState>;

    /// Run the task again. Returns the handle it now runs under, which may be
    /// `handle` itself or a fresh one.
    async fn retry(&self, handle: &TaskHandle, dispatch: &Dispatch) -> Result<TaskHandle>;
}
