//! Per-task OS group isolation.
//!
//! [`OsGroups`] binds one task's requested group memberships, and on
//! session-token platforms its login-session token, to the commands the
//! task will run. One manager exists per execution slot per task; it is
//! never reused across tasks.
//!
//! # Lifecycle
//!
//! ```text
//! claim task
//!   └─ start()             add task user to payload groups, or skip
//!       └─ update_commands()   refresh session, stamp tokens
//!           └─ task commands run (execution subsystem)
//!               └─ stop()      revert recorded membership additions
//! ```
//!
//! # Security Model
//!
//! - `run_tasks_as_current_user` short-circuits everything: one task-log
//!   line names the skipped groups, and no OS state or descriptor is
//!   touched.
//! - Malformed or unknown payload group names fail the task
//!   ([`FaultDomain::Task`]); host, privilege, and session failures
//!   resolve as internal worker errors ([`FaultDomain::Worker`]).
//! - `stop` reverts exactly the memberships `start` added. Task-user
//!   accounts are reused across tasks, so a leaked membership would hand
//!   one task's privileges to the next.
//!
//! # Invariants
//!
//! - [INV-ISO-001] An empty group request performs no OS calls and writes
//!   no task-log lines.
//! - [INV-ISO-002] A failed `start` leaves earlier additions recorded for
//!   `stop` to revert; there is no rollback inside `start`.
//! - [INV-ISO-003] `stop` never panics and never escalates cleanup
//!   failures beyond the accumulator.
//! - [INV-ISO-004] `update_commands` stamps every descriptor in the
//!   batch with one token from one completed refresh, or none at all.


use std::fmt;
use std::sync::Arc;

use quarry_core::config::WorkerConfig;
use quarry_core::fault::{ExecutionErrors, FaultDomain, TaskError};
use quarry_core::payload::PayloadError;
use quarry_core::task::Task;
use thiserror::Error;

use crate::feature::TaskFeature;
use crate::identity::{IdentityError, IdentityProvider, MembershipChange, OsGroup};
use crate::launch::LaunchSpec;

// ─────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────

/// Errors from the per-task isolation manager.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IsolationError {
    /// The task payload failed validation.
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),

    /// A requested group does not exist on this host.
    #[error("no such os group '{name}' on this worker; check the task's osGroups list")]
    UnknownGroup {
        /// The requested group name.
        name: String,
    },

    /// A group could not be resolved against the host group database.
    #[error("failed to resolve os group '{name}': {source}")]
    GroupResolution {
        /// The group being resolved.
        name: String,
        /// Underlying identity failure.
        #[source]
        source: IdentityError,
    },

    /// The task user could not be added to a resolved group.
    #[error("failed to apply os group '{group}' for task user '{user}': {source}")]
    GroupApply {
        /// The group being applied.
        group: String,
        /// The task user.
        user: String,
        /// Underlying identity failure.
        #[source]
        source: IdentityError,
    },

    /// The task user's login session could not be refreshed.
    #[error("failed to refresh task user login session: {source}")]
    SessionRefresh {
        /// Underlying identity failure.
        #[source]
        source: IdentityError,
    },
}

impl IsolationError {
    /// Which fault domain resolves the task when this error is fatal.
    ///
    /// Payload-caused failures, a malformed or unknown group name, fail
    /// the task. Everything else is a worker-side problem and resolves as
    /// an internal error so the scheduler retries the task elsewhere.
    #[must_use]
    pub const fn fault_domain(&self) -> FaultDomain {
        match self {
            Self::InvalidPayload(_) | Self::UnknownGroup { .. } => FaultDomain::Task,
            Self::GroupResolution { .. } | Self::GroupApply { .. } | Self::SessionRefresh { .. } => {
                FaultDomain::Worker
            },
        }
    }

    /// This error as a classified task-execution error.
    #[must_use]
    pub fn to_task_error(&self) -> TaskError {
        TaskError {
            domain: self.fault_domain(),
            message: self.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────

/// Why isolation was skipped for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The payload requested no groups.
    NoGroupsRequested,
    /// The worker runs tasks as its own user; isolation is disabled.
    CurrentUserMode,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoGroupsRequested => f.write_str("no os groups requested"),
            Self::CurrentUserMode => f.write_str("tasks run as the current user"),
        }
    }
}

/// Result of a successful isolation start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IsolationOutcome {
    /// Nothing was applied, deliberately.
    Skipped(SkipReason),
    /// The task user is now a member of every requested group.
    Applied {
        /// The requested groups, in application order.
        groups: Vec<String>,
    },
}

impl IsolationOutcome {
    /// `true` when group membership was applied.
    #[must_use]
    pub const fn was_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }

    /// The skip reason, when nothing was applied.
    #[must_use]
    pub const fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            Self::Skipped(reason) => Some(*reason),
            Self::Applied { .. } => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────

/// Per-task OS group isolation manager.
///
/// Holds the task, the worker configuration, the platform identity
/// provider shared by all slots, and the record of memberships it added
/// and must revert.
pub struct OsGroups<P: IdentityProvider> {
    task: Arc<Task>,
    config: Arc<WorkerConfig>,
    provider: Arc<P>,
    user: String,
    applied: Vec<OsGroup>,
}

impl<P: IdentityProvider> OsGroups<P> {
    /// Create the manager for one task, bound to the task user the
    /// worker provisioned for it.
    #[must_use]
    pub fn new(
        task: Arc<Task>,
        config: Arc<WorkerConfig>,
        provider: Arc<P>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            task,
            config,
            provider,
            user: user.into(),
            applied: Vec::new(),
        }
    }

    /// Memberships added by `start` and not yet reverted.
    #[must_use]
    pub fn applied_groups(&self) -> &[OsGroup] {
        &self.applied
    }

    /// Refresh the task user's session and stamp its token onto every
    /// not-yet-started descriptor.
    ///
    /// Runs once per task, after [`TaskFeature::start`] and before the
    /// first command. In current-user mode the descriptors pass through
    /// untouched. On static-group platforms there is no token and this is
    /// a no-op. On session-token platforms the refresh and the stamping
    /// pass run under the broker's context lock as one critical section,
    /// so the task never starts with a token an earlier task held.
    ///
    /// # Errors
    ///
    /// [`IsolationError::SessionRefresh`] when the session cannot be
    /// established. Fatal to the task: no command may start on a stale
    /// session.
    pub fn update_commands(&self, specs: &mut [LaunchSpec]) -> Result<(), IsolationError> {
        if self.config.run_tasks_as_current_user {
            return Ok(());
        }

        match self.provider.refresh_and_stamp(specs) {
            Ok(Some(token)) => {
                tracing::debug!(
                    task = %self.task.id,
                    generation = token.generation(),
                    descriptors = specs.len(),
                    "stamped launch descriptors with refreshed session token"
                );
                Ok(())
            },
            Ok(None) => Ok(()),
            Err(source) => Err(IsolationError::SessionRefresh { source }),
        }
    }
}

impl<P: IdentityProvider> TaskFeature for OsGroups<P> {
    fn name(&self) -> &'static str {
        "os-groups"
    }

    fn start(&mut self) -> Result<IsolationOutcome, IsolationError> {
        let requested = &self.task.payload.os_groups;
        if requested.is_empty() {
            return Ok(IsolationOutcome::Skipped(SkipReason::NoGroupsRequested));
        }

        if self.config.run_tasks_as_current_user {
            self.task.log().info(&format!(
                "Not adding task user to group(s) {requested:?} since tasks run as the current user."
            ));
            return Ok(IsolationOutcome::Skipped(SkipReason::CurrentUserMode));
        }

        self.task.payload.validate()?;

        for name in requested {
            let group = match self.provider.resolve_group(name) {
                Ok(group) => group,
                Err(source) if source.is_unknown_group() => {
                    return Err(IsolationError::UnknownGroup { name: name.clone() });
                },
                Err(source) => {
                    return Err(IsolationError::GroupResolution {
                        name: name.clone(),
                        source,
                    });
                },
            };

            match self.provider.add_member(&self.user, &group) {
                Ok(MembershipChange::Added) => {
                    tracing::debug!(
                        task = %self.task.id,
                        user = %self.user,
                        group = %group.name,
                        "added task user to os group"
                    );
                    self.applied.push(group);
                },
                Ok(MembershipChange::AlreadyMember) => {
                    tracing::debug!(
                        task = %self.task.id,
                        user = %self.user,
                        group = %group.name,
                        "task user already a member of os group"
                    );
                },
                Err(source) => {
                    return Err(IsolationError::GroupApply {
                        group: name.clone(),
                        user: self.user.clone(),
                        source,
                    });
                },
            }
        }

        tracing::info!(
            task = %self.task.id,
            user = %self.user,
            groups = ?requested,
            "task os group isolation applied"
        );
        Ok(IsolationOutcome::Applied {
            groups: requested.clone(),
        })
    }

    fn stop(&mut self, errors: &mut ExecutionErrors) {
        // Revert in reverse application order. Draining the record makes
        // a second stop a no-op.
        while let Some(group) = self.applied.pop() {
            if let Err(source) = self.provider.remove_member(&self.user, &group) {
                tracing::warn!(
                    task = %self.task.id,
                    user = %self.user,
                    group = %group.name,
                    error = %source,
                    "failed to revert os group membership"
                );
                errors.push(TaskError::worker_fault(format!(
                    "failed to remove task user '{}' from os group '{}' during cleanup: {source}",
                    self.user, group.name
                )));
            }
        }
    }
}
