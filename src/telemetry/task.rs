//! Span helpers for task execution and reconciliation.
//!
//! Every span carries the correlation id explicitly so log lines from one
//! logical task can be joined across attempts and processes.

use tracing::Span;

use crate::model::{ExecutionContext, TaskExecutionRecord};

/// Span around one wrapped execution.
///
/// `task.record_id` and `task.status` are filled in as the recorder
/// progresses.
pub fn start_execution_span(ctx: &ExecutionContext) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.kind" = %ctx.kind,
        "task.handle" = %ctx.handle,
        correlation_id = %ctx.correlation_id,
        "task.record_id" = tracing::field::Empty,
        "task.status" = tracing::field::Empty,
    )
}

/// Span around one reconciliation sweep.
pub fn start_sweep_span(threshold_secs: i64) -> Span {
    tracing::info_span!(
        "audit.sweep",
        "sweep.threshold_secs" = threshold_secs,
        "sweep.candidates" = tracing::field::Empty,
    )
}

/// Span around the reconciliation of a single stale record.
pub fn start_reconcile_span(record: &TaskExecutionRecord) -> Span {
    tracing::info_span!(
        "audit.reconcile",
        "task.record_id" = record.id.0,
        "task.kind" = %record.task_kind,
        "task.handle" = %record.effective_handle(),
        correlation_id = %record.correlation_id,
        "engine.state" = tracing::field::Empty,
    )
}

/// Record a status transition on `span` and emit it as an event.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("task.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
