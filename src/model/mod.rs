//! Core data model: audit records and execution context.

pub mod context;
pub mod record;

pub use context::ExecutionContext;
pub use record::{
    Change, Guard, NewRecord, RecordFilter, RecordId, Status, TaskExecutionRecord, TaskHandle,
};
