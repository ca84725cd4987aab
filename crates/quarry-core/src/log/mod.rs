//! Task-visible log sinks.
//!
//! Task log lines are free-text informational output that ends up in the
//! task's own log artifact, alongside command output. They are distinct
//! from worker diagnostics, which go through `tracing`. Nothing written
//! here is a stable machine interface.

use std::sync::{Mutex, PoisonError};

/// Sink for task-visible informational lines.
pub trait TaskLog: Send + Sync {
    /// Append one informational line to the task's log.
    fn info(&self, line: &str);
}

/// In-memory task log buffering lines behind a mutex.
///
/// The worker uses it to capture lines for later upload; tests use it to
/// assert on log contents.
#[derive(Debug, Default)]
pub struct MemoryTaskLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryTaskLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the lines appended so far.
    ///
    /// A poisoned lock yields whatever was written before the panic; log
    /// capture must not stack a second failure on top of a panicking task.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskLog for MemoryTaskLog {
    fn info(&self, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
    }
}
