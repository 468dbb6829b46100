//! Reconciliation monitor.
//!
//! Sweeps the audit log for records that stayed pending (or failed
//! retryably) past a staleness threshold, asks the task engine what really
//! happened to each, and repairs the log or re-issues the task.
//!
//! | engine state        | action                                   |
//! |---------------------|------------------------------------------|
//! | pending / running   | leave the record alone                   |
//! | success             | mark the record completed                |
//! | unknown / failure   | re-arm to pending, then `retry` the task |
//!
//! Candidates sharing an engine handle are reconciled together, so a task
//! is re-issued at most once per sweep however many records track it.
//!
//! Every write is guarded by the record version read at the start of the
//! sweep, so a recorder update landing concurrently wins and the monitor
//! backs off. Sweeps are idempotent: once a task has been re-issued the
//! engine reports it in flight and later sweeps leave it alone.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::dispatch::{Dispatch, EngineState, TaskEngine};
use crate::error::{Error, Result};
use crate::model::{Change, Guard, TaskExecutionRecord, TaskHandle};
use crate::store::AuditStore;
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_reconcile_span, start_sweep_span};

/// Configuration for the monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between sweeps when driven by [`Monitor::run`].
    pub interval: Duration,
    /// Records older than this are candidates.
    pub staleness_threshold: Duration,
    /// Candidates reconciled at the same time.
    pub concurrency: usize,
    /// Re-arms allowed per record before it is abandoned.
    pub max_reclaims: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30 * 60),
            staleness_threshold: Duration::from_secs(30 * 60),
            concurrency: 4,
            max_reclaims: 5,
        }
    }
}

/// What the monitor did with one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Engine reports the task in flight.
    Left,
    /// Missed success repaired.
    Repaired,
    /// Re-armed and re-issued under `handle`.
    Rearmed { handle: TaskHandle },
    /// Reclaim budget exhausted; marked failed for good.
    Abandoned,
    /// The record changed under us; left for the next sweep.
    Conflict,
}

impl Action {
    fn label(&self) -> &'static str {
        match self {
            Action::Left => "left",
            Action::Repaired => "repaired",
            Action::Rearmed { .. } => "rearmed",
            Action::Abandoned => "abandoned",
            Action::Conflict => "conflict",
        }
    }
}

/// Counts from one sweep. Callers are free to ignore it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub candidates: usize,
    pub left: usize,
    pub repaired: usize,
    pub rearmed: usize,
    pub abandoned: usize,
    pub conflicts: usize,
    pub errors: usize,
    /// Another sweep was already running; nothing was done.
    pub skipped: bool,
    /// Shutdown was requested before every candidate was started.
    pub cancelled: bool,
}

impl SweepReport {
    fn tally(&mut self, action: &Action) {
        match action {
            Action::Left => self.left += 1,
            Action::Repaired => self.repaired += 1,
            Action::Rearmed { .. } => self.rearmed += 1,
            Action::Abandoned => self.abandoned += 1,
            Action::Conflict => self.conflicts += 1,
        }
    }

    /// Number of records the sweep wrote to.
    pub fn changed(&self) -> usize {
        self.repaired + self.rearmed + self.abandoned
    }
}

/// The reconciliation monitor.
#[derive(Clone)]
pub struct Monitor {
    store: Arc<dyn AuditStore>,
    engine: Arc<dyn TaskEngine>,
    config: MonitorConfig,
    sweeping: Arc<Mutex<()>>,
    cancelled: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Monitor {
    pub fn new(store: Arc<dyn AuditStore>, engine: Arc<dyn TaskEngine>, config: MonitorConfig) -> Self {
        Self {
            store,
            engine,
            config,
            sweeping: Arc::new(Mutex::new(())),
            cancelled: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Stop starting new candidates and end [`Monitor::run`].
    /// Candidates already in progress finish.
    pub fn shutdown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.shutdown.notify_one();
    }

    /// Sweep records older than `threshold`.
    pub async fn sweep(&self, threshold: Duration) -> Result<SweepReport> {
        self.sweep_at(Utc::now(), threshold).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>, threshold: Duration) -> Result<SweepReport> {
        let Ok(_sweeping) = self.sweeping.try_lock() else {
            info!("sweep already in progress, skipping");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| Error::Config(format!("staleness threshold out of range: {e}")))?;
        let cutoff = now.checked_sub_signed(threshold).ok_or_else(|| {
            Error::Config(format!(
                "staleness threshold of {}s reaches before the earliest representable time",
                threshold.num_seconds()
            ))
        })?;
        let span = start_sweep_span(threshold.num_seconds());

        async {
            let candidates = self.store.find_stale(cutoff).await?;
            Span::current().record("sweep.candidates", candidates.len());
            metrics::sweep_candidates().add(candidates.len() as u64, &[]);

            let mut report = SweepReport {
                candidates: candidates.len(),
                ..SweepReport::default()
            };
            if candidates.is_empty() {
                debug!("no stale records");
                return Ok(report);
            }

            let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
            let mut joins = JoinSet::new();

            for group in group_by_handle(candidates) {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                // Checked per handle; a started group always finishes.
                if self.cancelled.load(Ordering::SeqCst) {
                    report.cancelled = true;
                    break;
                }

                let this = self.clone();
                let span = start_reconcile_span(&group[0]);
                let size = group.len();
                joins.spawn(
                    async move {
                        let _permit = permit;
                        (size, this.reconcile(group).await)
                    }
                    .instrument(span),
                );
            }

            while let Some(joined) = joins.join_next().await {
                match joined {
                    Ok((_, Ok(actions))) => {
                        for action in actions {
                            metrics::sweep_actions()
                                .add(1, &[KeyValue::new("action", action.label())]);
                            report.tally(&action);
                        }
                    }
                    Ok((size, Err(e))) => {
                        metrics::sweep_actions()
                            .add(size as u64, &[KeyValue::new("action", "error")]);
                        warn!(error = %e, records = size, "reconciliation failed, records stay stale");
                        report.errors += size;
                    }
                    Err(e) => {
                        metrics::sweep_actions().add(1, &[KeyValue::new("action", "error")]);
                        error!(error = %e, "reconciliation task panicked");
                        report.errors += 1;
                    }
                }
            }

            info!(
                candidates = report.candidates,
                left = report.left,
                repaired = report.repaired,
                rearmed = report.rearmed,
                abandoned = report.abandoned,
                conflicts = report.conflicts,
                errors = report.errors,
                "sweep finished"
            );
            Ok::<_, Error>(report)
        }
        .instrument(span)
        .await
    }

    /// Reconcile every stale record tracked under one engine handle.
    ///
    /// Each delivery of a task writes its own record, so several records can
    /// share a handle. The engine is asked once and the task is re-issued at
    /// most once; every re-armed record then points at the same new handle.
    async fn reconcile(&self, group: Vec<TaskExecutionRecord>) -> Result<Vec<Action>> {
        let handle = group[0].effective_handle().clone();
        let state = self.engine.get_state(&handle).await?;
        Span::current().record("engine.state", tracing::field::display(state));

        match state {
            EngineState::Pending | EngineState::Running => {
                debug!(records = group.len(), "task still in flight");
                Ok(vec![Action::Left; group.len()])
            }
            EngineState::Success => {
                let mut actions = Vec::with_capacity(group.len());
                for record in &group {
                    let action = self.apply(record, Change::Complete, Action::Repaired).await?;
                    if action == Action::Repaired {
                        info!(record_id = %record.id, "repaired missed completion");
                    }
                    actions.push(action);
                }
                Ok(actions)
            }
            EngineState::Unknown | EngineState::Failure => {
                let mut actions = Vec::with_capacity(group.len());
                let mut rearmed = Vec::new();
                for record in &group {
                    if record.reclaim_count >= self.config.max_reclaims {
                        let remarks = format!(
                            "abandoned after {} reclaims, engine reports {state}",
                            record.reclaim_count
                        );
                        warn!(record_id = %record.id, %remarks, "reclaim budget exhausted");
                        actions.push(
                            self.apply(record, Change::Abandon { remarks }, Action::Abandoned)
                                .await?,
                        );
                        continue;
                    }
                    let action = self
                        .apply(record, Change::Rearm, Action::Rearmed { handle: handle.clone() })
                        .await?;
                    if action == Action::Conflict {
                        actions.push(action);
                    } else {
                        rearmed.push(record);
                    }
                }

                let Some(first) = rearmed.first() else {
                    return Ok(actions);
                };

                // A failed retry leaves the records pending and stale, so the
                // next sweep tries again.
                let dispatch = Dispatch::from_record(first);
                let new_handle = self.engine.retry(&handle, &dispatch).await?;
                if new_handle != handle {
                    for record in &rearmed {
                        self.store.set_retry_handle(record.id, &new_handle).await?;
                    }
                }
                info!(
                    retry_handle = %new_handle,
                    records = rearmed.len(),
                    reclaims = first.reclaim_count + 1,
                    "task re-issued"
                );
                actions.extend(rearmed.iter().map(|_| Action::Rearmed {
                    handle: new_handle.clone(),
                }));
                Ok(actions)
            }
        }
    }

    /// Version-guarded write. Returns `on_success`, or `Conflict` when the
    /// record moved since it was read.
    async fn apply(&self, record: &TaskExecutionRecord, change: Change, on_success: Action) -> Result<Action> {
        let target = change.target();
        match self
            .store
            .update(record.id, Guard::Version(record.version), change)
            .await?
        {
            Some(_) => {
                record_state_transition(&Span::current(), record.status.as_str(), target.as_str());
                metrics::record_transitions().add(
                    1,
                    &[
                        KeyValue::new("from", record.status.as_str()),
                        KeyValue::new("to", target.as_str()),
                    ],
                );
                Ok(on_success)
            }
            None => {
                debug!("record changed concurrently, skipping");
                Ok(Action::Conflict)
            }
        }
    }

    /// Sweep every `interval` until [`Monitor::shutdown`].
    pub async fn run(&self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval_secs = self.config.interval.as_secs(),
            threshold_secs = self.config.staleness_threshold.as_secs(),
            "monitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("monitor shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.sweep(self.config.staleness_threshold).await {
                error!(error = %e, "sweep failed");
            }
        }
    }
}

/// Split candidates by the handle the engine knows them under, keeping the
/// oldest-first order of both groups and members.
fn group_by_handle(candidates: Vec<TaskExecutionRecord>) -> Vec<Vec<TaskExecutionRecord>> {
    let mut index: HashMap<TaskHandle, usize> = HashMap::new();
    let mut groups: Vec<Vec<TaskExecutionRecord>> = Vec::new();
    for record in candidates {
        let handle = record.effective_handle().clone();
        match index.get(&handle) {
            Some(&i) => groups[i].push(record),
            None => {
                index.insert(handle, groups.len());
                groups.push(vec![record]);
            }
        }
    }
    groups
}
