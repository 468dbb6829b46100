//! Task engine backed by a pgmq queue.
//!
//! Handles are pgmq message ids. A message that is in the queue but
//! invisible is held by a worker; archived messages completed; deleted
//! messages are unknown to the engine.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{Dispatch, EngineState, TaskEngine};
use crate::db::Db;
use crate::db::pgmq::MessageLocation;
use crate::error::Result;
use crate::model::TaskHandle;

pub struct PgmqEngine {
    db: Db,
    queue: String,
    max_deliveries: u32,
}

impl PgmqEngine {
    pub fn new(db: Db, queue: impl Into<String>, max_deliveries: u32) -> Self {
        Self {
            db,
            queue: queue.into(),
            max_deliveries,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    fn message_id(handle: &TaskHandle) -> Option<i64> {
        handle.as_str().parse().ok()
    }
}

#[async_trait]
impl TaskEngine for PgmqEngine {
    async fn submit(&self, dispatch: &Dispatch) -> Result<TaskHandle> {
        let payload = serde_json::to_value(dispatch)?;
        let msg_id = self.db.send_to_queue(&self.queue, &payload, 0).await?;
        debug!(msg_id, kind = %dispatch.kind, correlation_id = %dispatch.correlation_id, "task submitted");
        Ok(TaskHandle(msg_id.to_string()))
    }

    async fn get_state(&self, handle: &TaskHandle) -> Result<EngineState> {
        let Some(msg_id) = Self::message_id(handle) else {
            return Ok(EngineState::Unknown);
        };

        let state = match self.db.locate_message(&self.queue, msg_id).await? {
            MessageLocation::Queued { read_ct, vt } => {
                if vt > Utc::now() {
                    if read_ct > 0 {
                        EngineState::Running
                    } else {
                        EngineState::Pending
                    }
                } else if read_ct.max(0) as u32 > self.max_deliveries {
                    EngineState::Failure
                } else {
                    EngineState::Pending
                }
            }
            MessageLocation::Archived => EngineState::Success,
            MessageLocation::Missing => EngineState::Unknown,
        };
        Ok(state)
    }

    async fn retry(&self, handle: &TaskHandle, dispatch: &Dispatch) -> Result<TaskHandle> {
        if let Some(msg_id) = Self::message_id(handle) {
            if self.db.set_visibility(&self.queue, msg_id, 0).await? {
                debug!(msg_id, "message made visible for retry");
                return Ok(handle.clone());
            }
        }
        self.submit(dispatch).await
    }
}
