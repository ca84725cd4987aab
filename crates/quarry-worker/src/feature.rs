//! Per-task lifecycle hooks driven by the execution subsystem.

use quarry_core::fault::ExecutionErrors;

use crate::isolation::{IsolationError, IsolationOutcome};

/// A worker feature with per-task setup and teardown.
///
/// The execution subsystem calls [`start`](TaskFeature::start) after
/// claiming a task and before its first command, and
/// [`stop`](TaskFeature::stop) exactly once after the last command has
/// finished, including when `start` failed or the task was aborted.
pub trait TaskFeature {
    /// Stable feature name, used in worker diagnostics.
    fn name(&self) -> &'static str;

    /// Per-task setup.
    ///
    /// # Errors
    ///
    /// A returned error is fatal to the task. The execution subsystem
    /// classifies it through [`IsolationError::fault_domain`] and still
    /// calls [`stop`](TaskFeature::stop) afterwards.
    fn start(&mut self) -> Result<IsolationOutcome, IsolationError>;

    /// Per-task teardown.
    ///
    /// Appends problems to `errors` instead of returning them, so that
    /// teardown always runs to completion. Must never panic.
    fn stop(&mut self, errors: &mut ExecutionErrors);
}
