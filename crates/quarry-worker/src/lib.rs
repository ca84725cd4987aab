//! Privilege isolation runtime for the quarry task worker.
//!
//! This crate binds an executing task's OS identity to the processes the
//! task spawns. Two identity models are supported behind one capability
//! interface:
//!
//! - **Static groups**: the task user's supplementary group memberships
//!   are edited in the host's group database before the task's first
//!   command starts (POSIX hosts).
//! - **Session tokens**: a fresh login session is established for the
//!   task user and its access token is stamped onto every not-yet-started
//!   command, on platforms where process identity derives from the login
//!   session that created the process image.
//!
//! # Security Model
//!
//! - Running tasks as the worker's own user (`run_tasks_as_current_user`)
//!   disables isolation entirely: group requests are logged and skipped,
//!   and launch descriptors pass through untouched.
//! - Group failures caused by the payload (malformed or unknown names)
//!   fail the task; host and session failures resolve as internal worker
//!   errors.
//! - Credential secrets live in [`secrecy::SecretString`] and never
//!   appear in logs or error messages.
//!
//! Module map: [`identity`] holds the platform capability (group
//! administration and login-session custody), [`isolation`] the per-task
//! manager, [`launch`] the command launch descriptors, and [`feature`]
//! the per-task lifecycle hooks the execution subsystem drives.

pub mod feature;
pub mod identity;
pub mod isolation;
pub mod launch;

pub use identity::{AccessToken, IdentityProvider, IsolationModel};
pub use isolation::{IsolationError, IsolationOutcome, OsGroups, SkipReason};
pub use launch::LaunchSpec;
