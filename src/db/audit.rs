//! Postgres-backed audit log store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Change, Guard, NewRecord, RecordFilter, RecordId, TaskExecutionRecord, TaskHandle,
};
use crate::store::AuditStore;

const COLUMNS: &str = "id, task_handle, task_kind, correlation_id, request_payload, status, completed, retryable, remarks, retry_handle, reclaim_count, version, created_at, updated_at";

#[async_trait]
impl AuditStore for super::Db {
    async fn create(&self, new: NewRecord) -> Result<TaskExecutionRecord> {
        let row: RecordRow = sqlx::query_as(&format!(
            "INSERT INTO task_execution_records (task_handle, task_kind, correlation_id, request_payload)
             VALUES ($1, $2, $3, $4)
             RETURNING {COLUMNS}"
        ))
        .bind(new.task_handle.as_str())
        .bind(&new.task_kind)
        .bind(new.correlation_id)
        .bind(&new.request_payload)
        .fetch_one(&self.pool)
        .await?;

        row.try_into_record()
    }

    async fn get(&self, id: RecordId) -> Result<TaskExecutionRecord> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM task_execution_records WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("task execution record {id}")))?
            .try_into_record()
    }

    async fn update(
        &self,
        id: RecordId,
        guard: Guard,
        change: Change,
    ) -> Result<Option<TaskExecutionRecord>> {
        let (retryable, remarks, reclaim_increment) = match &change {
            Change::Complete => (false, Some(String::new()), 0),
            Change::Fail { retryable, remarks } => (*retryable, Some(remarks.clone()), 0),
            Change::Rearm => (false, None, 1),
            Change::Abandon { remarks } => (false, Some(remarks.clone()), 0),
        };
        let target = change.target();

        // The guard is evaluated by the UPDATE itself, so the read-check-write
        // is a single atomic statement per row.
        let guard_clause = match guard {
            Guard::Pending => "status = 'pending'",
            Guard::Version(_) => "version = $7",
        };
        let sql = format!(
            "UPDATE task_execution_records
             SET status = $1, completed = $2, retryable = $3, remarks = COALESCE($4, remarks),
                 reclaim_count = reclaim_count + $5, version = version + 1, updated_at = now()
             WHERE id = $6 AND {guard_clause}
             RETURNING {COLUMNS}"
        );

        let mut query = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(target.as_str())
            .bind(target == crate::model::Status::Completed)
            .bind(retryable)
            .bind(remarks)
            .bind(reclaim_increment)
            .bind(id.0);
        if let Guard::Version(v) = guard {
            query = query.bind(v);
        }

        match query.fetch_optional(&self.pool).await? {
            Some(row) => Ok(Some(row.try_into_record()?)),
            None => {
                // Distinguish "guard failed" from "no such record".
                self.get(id).await?;
                Ok(None)
            }
        }
    }

    async fn set_retry_handle(&self, id: RecordId, handle: &TaskHandle) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE task_execution_records
             SET retry_handle = $1, version = version + 1, updated_at = now()
             WHERE id = $2",
        )
        .bind(handle.as_str())
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("task execution record {id}")));
        }
        Ok(())
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<TaskExecutionRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM task_execution_records
             WHERE (status = 'pending' OR (status = 'failed' AND retryable))
             AND created_at < $1
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecordRow::try_into_record).collect()
    }

    async fn list(&self, filter: &RecordFilter) -> Result<Vec<TaskExecutionRecord>> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM task_execution_records
             WHERE ($1::text IS NULL OR status = $1)
             AND ($2::uuid IS NULL OR correlation_id = $2)
             AND ($3::text IS NULL OR task_handle = $3)
             ORDER BY id DESC
             LIMIT $4"
        ))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.correlation_id)
        .bind(filter.task_handle.as_ref().map(|h| h.as_str()))
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecordRow::try_into_record).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    task_handle: String,
    task_kind: String,
    correlation_id: Uuid,
    request_payload: String,
    status: String,
    completed: bool,
    retryable: bool,
    remarks: String,
    retry_handle: Option<String>,
    reclaim_count: i32,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn try_into_record(self) -> Result<TaskExecutionRecord> {
        Ok(TaskExecutionRecord {
            id: RecordId(self.id),
            task_handle: TaskHandle(self.task_handle),
            task_kind: self.task_kind,
            correlation_id: self.correlation_id,
            request_payload: self.request_payload,
            status: self.status.parse()?,
            completed: self.completed,
            retryable: self.retryable,
            remarks: self.remarks,
            retry_handle: self.retry_handle.map(TaskHandle),
            reclaim_count: self.reclaim_count.max(0) as u32,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
