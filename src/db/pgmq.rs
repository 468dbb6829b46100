//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions (create, send, read, set_vt, archive, delete)
//! and reads the per-queue tables `pgmq.q_<name>` / `pgmq.a_<name>` to answer
//! state queries.

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub vt: DateTime<Utc>,
    pub message: serde_json::Value,
}

/// Where a message currently lives.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageLocation {
    /// Still in the live queue.
    Queued { read_ct: i32, vt: DateTime<Utc> },
    /// Moved to the archive table.
    Archived,
    /// Deleted or never existed.
    Missing,
}

fn count(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

/// pgmq table names are derived from the queue name, so only plain
/// identifiers are accepted before they are spliced into SQL.
fn checked_queue_name(queue_name: &str) -> Result<&str> {
    let valid = !queue_name.is_empty()
        && queue_name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(queue_name)
    } else {
        Err(Error::Config(format!("invalid queue name: {queue_name:?}")))
    }
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        let queue_name = checked_queue_name(queue_name)?;
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        count(queue_name, "create");
        Ok(())
    }

    /// Send a message. Returns the message id.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds)
            .fetch_one(&self.pool)
            .await?;
        count(queue_name, "send");
        Ok(row.0)
    }

    /// Read the next visible message, hiding it for `vt_seconds`.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<_, (i64, i32, DateTime<Utc>, serde_json::Value)>(
            "SELECT msg_id, read_ct, vt, message FROM pgmq.read($1, $2, 1)",
        )
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(&self.pool)
        .await?;

        count(queue_name, if row.is_some() { "read" } else { "read_empty" });

        Ok(row.map(|(msg_id, read_ct, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            vt,
            message,
        }))
    }

    /// Make a message visible again after `vt_seconds` (0 = immediately).
    /// Returns false if the message is no longer in the queue.
    pub async fn set_visibility(&self, queue_name: &str, msg_id: i64, vt_seconds: i32) -> Result<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(vt_seconds)
            .fetch_optional(&self.pool)
            .await?;
        count(queue_name, "set_vt");
        Ok(row.is_some())
    }

    /// Archive a message (moves to the archive table, kept for audit).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        count(queue_name, "archive");
        Ok(())
    }

    /// Delete a message permanently.
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        count(queue_name, "delete");
        Ok(())
    }

    /// Look a message up in the live queue, then the archive.
    pub async fn locate_message(&self, queue_name: &str, msg_id: i64) -> Result<MessageLocation> {
        let queue_name = checked_queue_name(queue_name)?;

        let live: Option<(i32, DateTime<Utc>)> = sqlx::query_as(&format!(
            "SELECT read_ct, vt FROM pgmq.q_{queue_name} WHERE msg_id = $1"
        ))
        .bind(msg_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some((read_ct, vt)) = live {
            return Ok(MessageLocation::Queued { read_ct, vt });
        }

        let archived: Option<(i64,)> = sqlx::query_as(&format!(
            "SELECT msg_id FROM pgmq.a_{queue_name} WHERE msg_id = $1"
        ))
        .bind(msg_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match archived {
            Some(_) => MessageLocation::Archived,
            None => MessageLocation::Missing,
        })
    }
}
