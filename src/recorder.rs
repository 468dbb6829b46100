//! Execution recorder: wraps a unit of work so its lifecycle lands in the
//! audit log.
//!
//! A pending record is written before the work starts; if that write fails
//! the work does not run. Exactly one terminal update follows. Terminal
//! write failures are logged and never change what the caller gets back,
//! and task failures are reported in the returned [`Execution`] rather than
//! propagated. If the process dies mid-execution the record stays pending
//! and the monitor picks it up.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{Instrument, Span, error, info, warn};

use crate::codec::Arguments;
use crate::error::{Result, TaskError};
use crate::model::{Change, ExecutionContext, Guard, NewRecord, RecordId};
use crate::store::AuditStore;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_execution_span};

/// What happened to a wrapped unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution<T> {
    Completed(T),
    Failed { retryable: bool, reason: String },
}

impl<T> Execution<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Execution::Completed(_))
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Execution::Completed(v) => Some(v),
            Execution::Failed { .. } => None,
        }
    }
}

/// Writes audit records around task executions.
#[derive(Clone)]
pub struct Recorder {
    store: Arc<dyn AuditStore>,
}

impl Recorder {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Encode `args` against `params` and run `work` under audit.
    ///
    /// Returns `Err` only when the pending record could not be written, in
    /// which case `work` was never called.
    pub async fn execute<T, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        args: &Arguments<'_>,
        params: &[&str],
        work: F,
    ) -> Result<Execution<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, TaskError>>,
    {
        let payload = args.encode(params);
        self.execute_encoded(ctx, payload, work).await
    }

    /// Like [`Recorder::execute`] with an already-encoded request payload.
    pub async fn execute_encoded<T, F, Fut>(
        &self,
        ctx: &ExecutionContext,
        request_payload: String,
        work: F,
    ) -> Result<Execution<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, TaskError>>,
    {
        let span = start_execution_span(ctx);

        async {
            let record = self
                .store
                .create(NewRecord {
                    task_handle: ctx.handle.clone(),
                    task_kind: ctx.kind.clone(),
                    correlation_id: ctx.correlation_id,
                    request_payload,
                })
                .await
                .inspect_err(|e| error!(error = %e, "could not create audit record, task not run"))?;

            span.record("task.record_id", record.id.0);
            record_state_transition(&span, "none", "pending");
            metrics::records_created().add(1, &[KeyValue::new("kind", ctx.kind.clone())]);

            let start = Instant::now();
            let result = work().await;
            let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

            let (execution, change) = match result {
                Ok(value) => {
                    info!(duration_ms, "task completed");
                    (Execution::Completed(value), Change::Complete)
                }
                Err(err) => {
                    let retryable = err.is_retryable();
                    let mut reason = err.to_string();
                    if reason.is_empty() {
                        reason = "task failed".to_string();
                    }
                    if retryable {
                        warn!(duration_ms, %reason, "task failed, flagged for reconciliation");
                    } else {
                        error!(duration_ms, %reason, "task failed");
                    }
                    let change = Change::Fail {
                        retryable,
                        remarks: reason.clone(),
                    };
                    (Execution::Failed { retryable, reason }, change)
                }
            };

            let outcome = match &execution {
                Execution::Completed(_) => "completed",
                Execution::Failed { retryable: true, .. } => "retryable",
                Execution::Failed { .. } => "failed",
            };
            metrics::execution_duration_ms().record(
                duration_ms,
                &[
                    KeyValue::new("kind", ctx.kind.clone()),
                    KeyValue::new("outcome", outcome),
                ],
            );

            self.finish(ctx, &span, record.id, change).await;
            Ok::<_, crate::error::Error>(execution)
        }
        .instrument(span.clone())
        .await
    }

    /// Best-effort terminal update.
    async fn finish(&self, ctx: &ExecutionContext, span: &Span, id: RecordId, change: Change) {
        let target = change.target();
        match self.store.update(id, Guard::Pending, change).await {
            Ok(Some(_)) => {
                record_state_transition(span, "pending", target.as_str());
                metrics::record_transitions().add(
                    1,
                    &[
                        KeyValue::new("from", "pending"),
                        KeyValue::new("to", target.as_str()),
                    ],
                );
            }
            Ok(None) => {
                warn!(record_id = %id, to = %target, "record no longer pending, terminal update skipped");
            }
            Err(e) => {
                error!(record_id = %id, to = %target, error = %e, "terminal audit update failed");
                metrics::audit_write_failures().add(1, &[KeyValue::new("kind", ctx.kind.clone())]);
            }
        }
    }
}
