//! Queue consumer: reads task messages, runs them under the recorder, and
//! settles each message according to the outcome.
//!
//! This is the bundled stand-in for an external worker pool. Delivery
//! accounting follows pgmq: a read hides the message for the visibility
//! timeout and bumps its read count; a message that is neither archived nor
//! deleted comes back on its own.

pub mod registry;

pub use registry::{Task, TaskRegistry};

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::codec::Arguments;
use crate::db::Db;
use crate::db::pgmq::PgmqMessage;
use crate::dispatch::Dispatch;
use crate::error::{Result, TaskError};
use crate::model::ExecutionContext;
use crate::recorder::{Execution, Recorder};

/// Configuration for the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue to consume.
    pub queue: String,
    /// Seconds a read message stays hidden. Also the per-task time limit.
    pub visibility_timeout: i32,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Deliveries per message before a recoverable failure counts as
    /// exhausted.
    pub max_deliveries: u32,
    /// Tasks run at the same time.
    pub max_concurrent: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue: "tasks".to_string(),
            visibility_timeout: 60,
            poll_interval: Duration::from_secs(2),
            max_deliveries: 3,
            max_concurrent: 4,
        }
    }
}

/// Delay before redelivering after the `read_ct`-th recoverable failure.
pub fn backoff_secs(read_ct: i32) -> i32 {
    let exp = read_ct.clamp(1, 10) as u32;
    2_i32.pow(exp).min(600)
}

/// How a message is settled once its execution is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// Done; keep it in the archive.
    Archive,
    /// Gone for good.
    Delete,
    /// Leave it queued, visible again after the given seconds.
    Redeliver(i32),
}

/// Decide what to do with a message given its execution outcome.
pub fn settle<T>(execution: &Execution<T>, read_ct: i32, final_delivery: bool) -> Settlement {
    match execution {
        Execution::Completed(_) => Settlement::Archive,
        Execution::Failed {
            retryable: true, ..
        } if !final_delivery => Settlement::Redeliver(backoff_secs(read_ct)),
        Execution::Failed { .. } => Settlement::Delete,
    }
}

/// How one delivery's attempt ended, before failure classification.
#[derive(Debug)]
pub enum Attempt<T> {
    /// The task body returned.
    Finished(std::result::Result<T, TaskError>),
    /// The task body ran past the time limit and was dropped.
    TimedOut(Duration),
    /// No task is registered for the kind.
    Unregistered(String),
}

/// Turn an attempt into the outcome the recorder stores.
///
/// Timeouts are recoverable. A recoverable failure on the final delivery
/// becomes `RetriesExhausted`, so it stays retryable but the message is
/// not redelivered.
pub fn classify<T>(attempt: Attempt<T>, read_ct: i32, final_delivery: bool) -> std::result::Result<T, TaskError> {
    let result = match attempt {
        Attempt::Finished(result) => result,
        Attempt::TimedOut(limit) => Err(TaskError::Recoverable(format!(
            "timed out after {}s",
            limit.as_secs()
        ))),
        Attempt::Unregistered(kind) => {
            return Err(TaskError::Permanent(format!("no task registered for kind {kind}")));
        }
    };
    match result {
        Err(TaskError::Recoverable(reason)) if final_delivery => Err(TaskError::RetriesExhausted {
            attempts: read_ct.max(0) as u32,
            reason,
        }),
        other => other,
    }
}

/// Count of deliveries being handled, with a way to wait for zero.
#[derive(Default)]
pub struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register one delivery. It stays counted until the guard drops,
    /// including when the handler panics.
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(Arc::clone(self))
    }

    pub fn len(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve once nothing is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

pub struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Clone)]
pub struct Worker {
    db: Db,
    recorder: Recorder,
    registry: Arc<TaskRegistry>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
    in_flight: Arc<InFlight>,
}

impl Worker {
    pub fn new(db: Db, recorder: Recorder, registry: Arc<TaskRegistry>, config: WorkerConfig) -> Self {
        Self {
            db,
            recorder,
            registry,
            config,
            shutdown: Arc::new(Notify::new()),
            in_flight: InFlight::new(),
        }
    }

    /// Signal the worker to stop reading. [`Worker::run`] returns once the
    /// deliveries already started have been settled.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Poll the queue until shutdown.
    pub async fn run(&self) -> Result<()> {
        self.db.create_queue(&self.config.queue).await?;
        info!(queue = %self.config.queue, kinds = ?self.registry.kinds(), "worker started");

        loop {
            if let Err(e) = self.drain().await {
                error!(error = %e, "queue read failed");
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(in_flight = self.in_flight.len(), "worker shutting down");
                    self.in_flight.wait_idle().await;
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Start tasks for visible messages until the queue is empty or the
    /// worker is at capacity.
    async fn drain(&self) -> Result<()> {
        while self.in_flight.len() < self.config.max_concurrent {
            let Some(msg) = self
                .db
                .read_from_queue(&self.config.queue, self.config.visibility_timeout)
                .await?
            else {
                return Ok(());
            };

            let guard = self.in_flight.enter();
            let this = self.clone();
            tokio::spawn(async move {
                let _guard = guard;
                this.handle(msg).await;
            });
        }
        Ok(())
    }

    async fn handle(&self, msg: PgmqMessage) {
        let queue = &self.config.queue;

        let dispatch: Dispatch = match serde_json::from_value(msg.message.clone()) {
            Ok(d) => d,
            Err(e) => {
                error!(msg_id = msg.msg_id, error = %e, "undecodable task message, dropping");
                if let Err(e) = self.db.delete_message(queue, msg.msg_id).await {
                    warn!(msg_id = msg.msg_id, error = %e, "delete failed");
                }
                return;
            }
        };

        let ctx = ExecutionContext::new(msg.msg_id.to_string(), dispatch.kind.clone())
            .with_correlation(dispatch.correlation_id);
        let final_delivery = msg.read_ct.max(0) as u32 >= self.config.max_deliveries;
        let task = self.registry.get(&dispatch.kind).cloned();

        // Bind the raw arguments to declared names; the task sees the same
        // object that lands in the audit payload.
        let params = task.as_ref().map(|t| t.params()).unwrap_or(&[]);
        let payload = Arguments::from_json(&dispatch.args).encode(params);
        let bound: serde_json::Value =
            serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null);

        let limit = Duration::from_secs(self.config.visibility_timeout.max(1) as u64);
        let read_ct = msg.read_ct;
        let kind = dispatch.kind.clone();

        let execution = self
            .recorder
            .execute_encoded(&ctx, payload, || async move {
                let attempt = match task {
                    None => Attempt::Unregistered(kind),
                    Some(task) => match tokio::time::timeout(limit, task.run(&bound)).await {
                        Ok(result) => Attempt::Finished(result),
                        Err(_) => Attempt::TimedOut(limit),
                    },
                };
                classify(attempt, read_ct, final_delivery)
            })
            .await;

        let execution = match execution {
            Ok(execution) => execution,
            Err(e) => {
                // Never run unobserved work: leave the message to reappear.
                error!(msg_id = msg.msg_id, error = %e, "audit store unavailable, task deferred");
                return;
            }
        };

        let settled = match settle(&execution, msg.read_ct, final_delivery) {
            Settlement::Archive => self.db.archive_message(queue, msg.msg_id).await,
            Settlement::Delete => self.db.delete_message(queue, msg.msg_id).await,
            Settlement::Redeliver(secs) => {
                debug!(msg_id = msg.msg_id, delay_secs = secs, "scheduling redelivery");
                self.db
                    .set_visibility(queue, msg.msg_id, secs)
                    .await
                    .map(|_| ())
            }
        };
        if let Err(e) = settled {
            warn!(msg_id = msg.msg_id, error = %e, "could not settle message");
        }
    }
}
