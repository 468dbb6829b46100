//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or
//! malformed. The database URL is wrapped in `secrecy::SecretString` so it
//! never reaches logs.

use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::{Error, Result};
use crate::monitor::MonitorConfig;
use crate::worker::WorkerConfig;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub task_queue: String,
    pub sweep_interval: Duration,
    pub staleness_threshold: Duration,
    pub sweep_concurrency: usize,
    pub max_reclaims: u32,
    pub max_deliveries: u32,
    pub visibility_timeout_secs: i32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let monitor = MonitorConfig::default();
        let worker = WorkerConfig::default();

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            task_queue: std::env::var("TASK_QUEUE").unwrap_or(worker.queue),
            sweep_interval: Duration::from_secs(parsed_var(
                "SWEEP_INTERVAL_SECS",
                monitor.interval.as_secs(),
            )?),
            staleness_threshold: Duration::from_secs(parsed_var(
                "STALENESS_THRESHOLD_SECS",
                monitor.staleness_threshold.as_secs(),
            )?),
            sweep_concurrency: parsed_var("SWEEP_CONCURRENCY", monitor.concurrency)?,
            max_reclaims: parsed_var("MAX_RECLAIMS", monitor.max_reclaims)?,
            max_deliveries: parsed_var("MAX_DELIVERIES", worker.max_deliveries)?,
            visibility_timeout_secs: parsed_var("VISIBILITY_TIMEOUT_SECS", worker.visibility_timeout)?,
        })
    }

    pub fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            interval: self.sweep_interval,
            staleness_threshold: self.staleness_threshold,
            concurrency: self.sweep_concurrency,
            max_reclaims: self.max_reclaims,
        }
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            queue: self.task_queue.clone(),
            visibility_timeout: self.visibility_timeout_secs,
            max_deliveries: self.max_deliveries,
            ..WorkerConfig::default()
        }
    }
}

/// A threshold given in minutes, saturating instead of overflowing.
pub fn minutes(mins: u64) -> Duration {
    Duration::from_secs(mins.saturating_mul(60))
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid value for {name} ({raw:?}): {e}"))),
        Err(_) => Ok(default),
    }
}
