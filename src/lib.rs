//! # task-audit
//!
//! Durable audit log and reconciliation for tasks run by an external queue
//! engine.
//!
//! Every execution is wrapped by the [`recorder`], which writes a pending
//! record before the work starts and one terminal update after it ends. The
//! [`monitor`] periodically sweeps for records that never reached a terminal
//! state, cross-checks them with the engine through the [`dispatch`] port,
//! and repairs or re-issues them. Records live in Postgres ([`db`]) or, for
//! tests, in memory ([`store::MemoryStore`]).

pub mod codec;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod monitor;
pub mod recorder;
pub mod store;
pub mod tasks;
pub mod telemetry;
pub mod worker;
