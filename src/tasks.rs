//! Reference task kinds shipped with the worker.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::error::TaskError;
use crate::worker::Task;

/// `process_data(data)`: simulated processing of a string payload.
///
/// The literal input `"error"` fails permanently, which is handy for
/// exercising the failure path end to end.
pub struct ProcessData {
    delay: Duration,
}

impl ProcessData {
    pub const KIND: &'static str = "process_data";
    pub const PARAMS: &'static [&'static str] = &["data"];

    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ProcessData {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl Task for ProcessData {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn params(&self) -> &'static [&'static str] {
        Self::PARAMS
    }

    async fn run(&self, args: &Value) -> Result<Value, TaskError> {
        let data = match args.get("data") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(TaskError::Permanent("missing argument: data".to_string())),
        };

        info!(%data, "processing data");
        tokio::time::sleep(self.delay).await;

        if data == "error" {
            return Err(TaskError::Permanent(format!("cannot process data: {data}")));
        }
        Ok(json!({ "processed": data }))
    }
}
