//! Error types for task-audit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// The external task engine rejected or failed a request.
    #[error("task engine error: {0}")]
    Engine(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// How a unit of work failed.
///
/// The variant is chosen where the failure originates (the engine client or
/// the task body), never by inspecting the message afterwards.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Transient infrastructure or broker failure. The engine may retry.
    #[error("recoverable failure: {0}")]
    Recoverable(String),

    /// The engine's retry budget for this task ran out.
    #[error("retries exhausted after {attempts} attempts: {reason}")]
    RetriesExhausted { attempts: u32, reason: String },

    /// Application-level failure. Retrying will not help.
    #[error("{0}")]
    Permanent(String),
}

impl TaskError {
    /// Whether the audit record should be flagged for reconciliation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TaskError::Recoverable(_) | TaskError::RetriesExhausted { .. }
        )
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        TaskError::Permanent(format!("{err:#}"))
    }
}
