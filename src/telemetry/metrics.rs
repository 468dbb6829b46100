//! Metric instruments for task-audit.
//!
//! Built on demand from the `"task-audit"` meter of the global
//! `MeterProvider`; without OTLP export they are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("task-audit")
}

/// Counter: audit records created. Labels: `kind`.
pub fn records_created() -> Counter<u64> {
    meter()
        .u64_counter("task_audit.records.created")
        .with_description("Audit records created at execution start")
        .build()
}

/// Counter: record status transitions. Labels: `from`, `to`.
pub fn record_transitions() -> Counter<u64> {
    meter()
        .u64_counter("task_audit.records.transitions")
        .with_description("Audit record status transitions")
        .build()
}

/// Counter: audit writes that failed after the task ran. Labels: `kind`.
pub fn audit_write_failures() -> Counter<u64> {
    meter()
        .u64_counter("task_audit.records.write_failures")
        .with_description("Terminal audit updates that could not be written")
        .build()
}

/// Histogram: wrapped task duration in milliseconds. Labels: `kind`, `outcome`.
pub fn execution_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("task_audit.execution.duration_ms")
        .with_description("Duration of wrapped task executions")
        .with_unit("ms")
        .build()
}

/// Counter: stale records examined by sweeps.
pub fn sweep_candidates() -> Counter<u64> {
    meter()
        .u64_counter("task_audit.sweep.candidates")
        .with_description("Stale audit records examined by reconciliation sweeps")
        .build()
}

/// Counter: reconciliation decisions. Labels: `action`.
pub fn sweep_actions() -> Counter<u64> {
    meter()
        .u64_counter("task_audit.sweep.actions")
        .with_description("Actions taken on stale audit records")
        .build()
}

/// Counter: queue-level operations. Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("task_audit.queue.operations")
        .with_description("Number of queue operations")
        .build()
}
