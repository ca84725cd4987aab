//! Task identity and the per-task state shared across worker features.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::log::TaskLog;
use crate::payload::TaskPayload;

/// Identifier of a claimed task, as issued by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Wrap a raw task identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One claimed task: its identifier, the payload fields the isolation
/// layer consumes, and the task-visible log sink.
pub struct Task {
    /// Scheduler-issued identifier.
    pub id: TaskId,
    /// Isolation-relevant payload fields.
    pub payload: TaskPayload,
    log: Arc<dyn TaskLog>,
}

impl Task {
    /// Create a task around its payload and log sink.
    #[must_use]
    pub fn new(id: TaskId, payload: TaskPayload, log: Arc<dyn TaskLog>) -> Self {
        Self { id, payload, log }
    }

    /// The task-visible log sink.
    #[must_use]
    pub fn log(&self) -> &dyn TaskLog {
        self.log.as_ref()
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
