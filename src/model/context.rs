//! Per-execution context threaded from the dispatch boundary.

use uuid::Uuid;

use super::record::TaskHandle;

/// Identity of one execution attempt, passed explicitly into the recorder
/// and every span it opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Engine handle of this attempt.
    pub handle: TaskHandle,
    /// Task kind being executed.
    pub kind: String,
    /// Shared by all attempts of the same logical task.
    pub correlation_id: Uuid,
}

impl ExecutionContext {
    /// Context for a fresh logical task. Correlation ids are time-ordered.
    pub fn new(handle: impl Into<TaskHandle>, kind: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            kind: kind.into(),
            correlation_id: Uuid::now_v7(),
        }
    }

    /// Keep an existing correlation id, e.g. one carried in a queue message.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}
