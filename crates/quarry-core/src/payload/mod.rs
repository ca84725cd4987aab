//! Task payload types and validation.
//!
//! The worker consumes only the payload fields that drive privilege
//! isolation: the ordered `osGroups` list and the task's command lines.
//! Group names are validated for syntax before any OS lookup happens, so
//! a malformed payload is reported as a task fault rather than surfacing
//! later as a confusing host error.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum length of a single OS group name.
///
/// Matches the common POSIX `groupadd` limit. Longer names cannot exist
/// on the hosts the worker targets, so anything longer is rejected before
/// a lookup is attempted.
pub const MAX_GROUP_NAME_LENGTH: usize = 32;

/// Maximum number of OS groups a single task may request.
pub const MAX_OS_GROUPS: usize = 32;

// ─────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────

/// Errors produced while validating a task payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PayloadError {
    /// A requested OS group name failed syntax validation.
    #[error("invalid os group name '{name}': {reason}")]
    InvalidGroupName {
        /// The offending group name, exactly as it appeared in the payload.
        name: String,
        /// The syntax rule it broke.
        reason: String,
    },

    /// The payload requests more OS groups than the worker allows.
    #[error("too many os groups requested: {count} exceeds the limit of {max}")]
    TooManyGroups {
        /// Number of groups requested.
        count: usize,
        /// Maximum the worker accepts.
        max: usize,
    },

    /// A task command line contains no program to run.
    #[error("task command at index {index} is empty; each command needs a program name")]
    EmptyCommandLine {
        /// Index of the empty command in the `command` array.
        index: usize,
    },
}

// ─────────────────────────────────────────────────────────────────────────
// Payload
// ─────────────────────────────────────────────────────────────────────────

/// The subset of a task definition consumed by the isolation layer.
///
/// Field names follow the worker payload schema, which is camelCase on
/// the wire. Both fields default to empty so partial payloads parse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TaskPayload {
    /// OS groups the task user should be a member of while the task runs,
    /// in application order. May be empty.
    pub os_groups: Vec<String>,

    /// The task's command lines. Each inner vector is one command: the
    /// program followed by its arguments.
    pub command: Vec<Vec<String>>,
}

impl TaskPayload {
    /// Validate the isolation-relevant payload fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the group list exceeds [`MAX_OS_GROUPS`], any
    /// group name fails [`validate_group_name`], or any command line is
    /// empty.
    pub fn validate(&self) -> Result<(), PayloadError> {
        if self.os_groups.len() > MAX_OS_GROUPS {
            return Err(PayloadError::TooManyGroups {
                count: self.os_groups.len(),
                max: MAX_OS_GROUPS,
            });
        }

        for name in &self.os_groups {
            validate_group_name(name)?;
        }

        for (index, line) in self.command.iter().enumerate() {
            if line.is_empty() {
                return Err(PayloadError::EmptyCommandLine { index });
            }
        }

        Ok(())
    }
}

/// Validate an OS group name's syntax.
///
/// Names must be non-empty, at most [`MAX_GROUP_NAME_LENGTH`] bytes,
/// start with an ASCII letter or underscore, and contain only ASCII
/// alphanumerics, dashes, and underscores. These are syntax checks only:
/// whether the group exists on the host is decided later by the platform
/// identity provider.
///
/// # Errors
///
/// Returns [`PayloadError::InvalidGroupName`] naming the rule that was
/// broken.
pub fn validate_group_name(name: &str) -> Result<(), PayloadError> {
    if name.is_empty() {
        return Err(PayloadError::InvalidGroupName {
            name: name.to_string(),
            reason: "name must not be empty".to_string(),
        });
    }

    if name.len() > MAX_GROUP_NAME_LENGTH {
        return Err(PayloadError::InvalidGroupName {
            name: name.to_string(),
            reason: format!(
                "name exceeds maximum length of {MAX_GROUP_NAME_LENGTH} bytes"
            ),
        });
    }

    let first = name.chars().next().unwrap_or_default();
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(PayloadError::InvalidGroupName {
            name: name.to_string(),
            reason: "name must start with a letter or underscore".to_string(),
        });
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(PayloadError::InvalidGroupName {
            name: name.to_string(),
            reason: "name may only contain alphanumerics, dashes, and underscores"
                .to_string(),
        });
    }

    Ok(())
}
