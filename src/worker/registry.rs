//! Task kinds a worker can run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Error, Result, TaskError};

/// A unit of work the worker knows how to run.
///
/// `params` is the static parameter list used to bind incoming arguments
/// for the audit payload; `run` receives those arguments as a JSON object
/// keyed by parameter name.
#[async_trait]
pub trait Task: Send + Sync {
    fn kind(&self) -> &'static str;

    fn params(&self) -> &'static [&'static str];

    async fn run(&self, args: &serde_json::Value) -> std::result::Result<serde_json::Value, TaskError>;
}

/// Registry of tasks, indexed by kind. Built at startup, read-only after.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<&'static str, Arc<dyn Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task. Two tasks may not share a kind.
    pub fn register(&mut self, task: Arc<dyn Task>) -> Result<()> {
        let kind = task.kind();
        if self.tasks.contains_key(kind) {
            return Err(Error::Config(format!("duplicate task kind: {kind}")));
        }
        self.tasks.insert(kind, task);
        Ok(())
    }

    /// Look up a task by kind.
    pub fn get(&self, kind: &str) -> Option<&Arc<dyn Task>> {
        self.tasks.get(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.tasks.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }
}
