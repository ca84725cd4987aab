//! Fault classification and accumulation for task execution.
//!
//! The worker distinguishes failures the task author caused (malformed
//! payload, unknown group names) from failures of the worker or its host.
//! The first resolve the task as failed; the second resolve it as an
//! internal worker error so the scheduler can retry the task elsewhere.

use std::fmt;

use thiserror::Error;

/// Who is at fault for a task-execution error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultDomain {
    /// The task author: the task resolves as failed.
    Task,
    /// The worker or its host: the task resolves as an internal error.
    Worker,
}

impl FaultDomain {
    /// `true` when the task author is at fault.
    #[must_use]
    pub const fn is_task_fault(self) -> bool {
        matches!(self, Self::Task)
    }
}

impl fmt::Display for FaultDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task => f.write_str("task"),
            Self::Worker => f.write_str("worker"),
        }
    }
}

/// One classified task-execution error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TaskError {
    /// Who is at fault.
    pub domain: FaultDomain,
    /// Human-readable description, shown in the task log and in worker
    /// diagnostics.
    pub message: String,
}

impl TaskError {
    /// An error attributable to the task author.
    #[must_use]
    pub fn task_fault(message: impl Into<String>) -> Self {
        Self {
            domain: FaultDomain::Task,
            message: message.into(),
        }
    }

    /// An error attributable to the worker or its host.
    #[must_use]
    pub fn worker_fault(message: impl Into<String>) -> Self {
        Self {
            domain: FaultDomain::Worker,
            message: message.into(),
        }
    }
}

/// Accumulator for non-fatal execution errors.
///
/// Cleanup paths append here instead of returning early so that teardown
/// always runs to completion. The execution subsystem folds the collected
/// errors into the task's final resolution once teardown is done.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionErrors {
    errors: Vec<TaskError>,
}

impl ExecutionErrors {
    /// Create an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one error.
    pub fn push(&mut self, error: TaskError) {
        self.errors.push(error);
    }

    /// `true` when at least one error was recorded.
    #[must_use]
    pub fn occurred(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of recorded errors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// `true` when nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// The recorded errors, in the order they occurred.
    #[must_use]
    pub fn errors(&self) -> &[TaskError] {
        &self.errors
    }

    /// The domain that decides the task's final resolution.
    ///
    /// A single worker fault dominates any number of task faults: if the
    /// host misbehaved at all, the task deserves a retry elsewhere.
    #[must_use]
    pub fn dominant_domain(&self) -> Option<FaultDomain> {
        if self.errors.iter().any(|e| e.domain == FaultDomain::Worker) {
            Some(FaultDomain::Worker)
        } else if self.errors.is_empty() {
            None
        } else {
            Some(FaultDomain::Task)
        }
    }

    /// Convert into a result, `Ok` when nothing was recorded.
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one error was recorded.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ExecutionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.is_empty() {
            return f.write_str("no execution errors");
        }
        let joined = self
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_classify_domains() {
        assert_eq!(TaskError::task_fault("bad payload").domain, FaultDomain::Task);
        assert_eq!(TaskError::worker_fault("host broke").domain, FaultDomain::Worker);
        assert!(FaultDomain::Task.is_task_fault());
        assert!(!FaultDomain::Worker.is_task_fault());
    }

    #[test]
    fn empty_accumulator_resolves_ok() {
        let errors = ExecutionErrors::new();
        assert!(!errors.occurred());
        assert!(errors.dominant_domain().is_none());
        assert!(errors.into_result().is_ok());
    }

    #[test]
    fn worker_fault_dominates_task_faults() {
        let mut errors = ExecutionErrors::new();
        errors.push(TaskError::task_fault("one"));
        errors.push(TaskError::worker_fault("two"));
        errors.push(TaskError::task_fault("three"));
        assert_eq!(errors.dominant_domain(), Some(FaultDomain::Worker));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn task_faults_alone_resolve_as_task_domain() {
        let mut errors = ExecutionErrors::new();
        errors.push(TaskError::task_fault("only"));
        assert_eq!(errors.dominant_domain(), Some(FaultDomain::Task));
    }

    #[test]
    fn display_joins_messages_in_order() {
        let mut errors = ExecutionErrors::new();
        errors.push(TaskError::worker_fault("first failure"));
        errors.push(TaskError::worker_fault("second failure"));
        assert_eq!(errors.to_string(), "first failure; second failure");
    }

    #[test]
    fn into_result_carries_the_errors() {
        let mut errors = ExecutionErrors::new();
        errors.push(TaskError::worker_fault("cleanup broke"));
        let err = errors.into_result().unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err.errors()[0].message, "cleanup broke");
    }
}
