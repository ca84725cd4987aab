//! Worker configuration.
//!
//! Loaded once at worker start from a TOML file. The isolation layer
//! consumes a single switch, `run_tasks_as_current_user`; the
//! `[task_user]` section describes the account naming the worker uses
//! when it provisions task users.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Account-name prefixes the worker refuses to provision task users under.
const DENIED_ACCOUNT_PREFIXES: &[&str] = &["root"];

/// Maximum length for the task-user account prefix.
///
/// Bounded so the generated account name, prefix plus a numeric suffix,
/// stays within the host's user-name limit.
const MAX_ACCOUNT_PREFIX_LENGTH: usize = 24;

/// Errors from loading or validating worker configuration.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration as TOML.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Failed to serialize the configuration to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration parsed but violates a constraint.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Top-level worker configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    /// Run task commands as the worker's own user instead of a dedicated
    /// task user. Disables all privilege isolation: group membership
    /// requests are logged and skipped, and login sessions are never
    /// touched.
    #[serde(default)]
    pub run_tasks_as_current_user: bool,

    /// Task-user provisioning settings.
    #[serde(default)]
    pub task_user: TaskUserSection,
}

/// Settings for the task-user accounts the worker provisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskUserSection {
    /// Prefix for generated task-user account names. The worker appends
    /// a per-task numeric suffix.
    #[serde(default = "default_account_prefix")]
    pub account_prefix: String,
}

impl Default for TaskUserSection {
    fn default() -> Self {
        Self {
            account_prefix: default_account_prefix(),
        }
    }
}

fn default_account_prefix() -> String {
    "task".to_string()
}

impl WorkerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        tracing::debug!(path = %path.display(), "loaded worker configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, if the retired
    /// `run_as_current_user` key is present, or if validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        // Reject the retired key by name before serde sees it, so the
        // operator gets a rename hint instead of an unknown-field error.
        if let Ok(raw) = content.parse::<toml::Table>() {
            if raw.contains_key("run_as_current_user") {
                return Err(ConfigError::Validation(
                    "'run_as_current_user' was renamed; use 'run_tasks_as_current_user'"
                        .to_string(),
                ));
            }
        }

        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_account_prefix(&self.task_user.account_prefix)
    }
}

fn validate_account_prefix(prefix: &str) -> Result<(), ConfigError> {
    if prefix.is_empty() {
        return Err(ConfigError::Validation(
            "task_user.account_prefix must not be empty".to_string(),
        ));
    }

    if prefix.len() > MAX_ACCOUNT_PREFIX_LENGTH {
        return Err(ConfigError::Validation(format!(
            "task_user.account_prefix exceeds maximum length of {MAX_ACCOUNT_PREFIX_LENGTH} bytes"
        )));
    }

    let first = prefix.chars().next().unwrap_or_default();
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ConfigError::Validation(
            "task_user.account_prefix must start with a letter or underscore".to_string(),
        ));
    }

    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(
            "task_user.account_prefix may only contain alphanumerics, dashes, and underscores"
                .to_string(),
        ));
    }

    for denied in DENIED_ACCOUNT_PREFIXES {
        if prefix.eq_ignore_ascii_case(denied) {
            return Err(ConfigError::Validation(format!(
                "'{denied}' is not allowed as a task-user account prefix"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config = WorkerConfig::from_toml("").unwrap();
        assert!(!config.run_tasks_as_current_user);
        assert_eq!(config.task_user.account_prefix, "task");
    }

    #[test]
    fn round_trips_through_toml() {
        let config = WorkerConfig {
            run_tasks_as_current_user: true,
            task_user: TaskUserSection {
                account_prefix: "builder".to_string(),
            },
        };
        let toml = config.to_toml().unwrap();
        let parsed = WorkerConfig::from_toml(&toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn retired_key_gets_a_rename_hint() {
        let err = WorkerConfig::from_toml("run_as_current_user = true\n").unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("run_tasks_as_current_user"),
            "message should hint at the new key: {message}"
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = WorkerConfig::from_toml("run_tasks_as_curent_user = true\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "unexpected error: {err}");
    }

    #[test]
    fn root_prefix_is_denied() {
        let err = WorkerConfig::from_toml("[task_user]\naccount_prefix = \"Root\"\n").unwrap_err();
        assert!(err.to_string().contains("not allowed"), "message: {err}");
    }

    #[test]
    fn malformed_prefixes_are_rejected() {
        for prefix in ["", "9task", "task user", "a-very-long-prefix-over-the-limit"] {
            let toml = format!("[task_user]\naccount_prefix = \"{prefix}\"\n");
            let result = WorkerConfig::from_toml(&toml);
            assert!(result.is_err(), "expected '{prefix}' to be rejected");
        }
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(&path, "run_tasks_as_current_user = true\n").unwrap();

        let config = WorkerConfig::from_file(&path).unwrap();
        assert!(config.run_tasks_as_current_user);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkerConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)), "unexpected error: {err}");
    }
}
