//! Command launch descriptors.
//!
//! A [`LaunchSpec`] describes one not-yet-started task command. The
//! execution subsystem owns construction and spawning; the isolation
//! layer only ever touches the security attribute, and only through the
//! session broker while it holds the task-user context lock.

use std::path::PathBuf;

use crate::identity::AccessToken;

/// One not-yet-started task command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Program to execute.
    pub program: String,
    /// Arguments, in order.
    pub args: Vec<String>,
    /// Additional environment, as key/value pairs.
    pub env: Vec<(String, String)>,
    /// Working directory, if different from the worker's.
    pub cwd: Option<PathBuf>,
    /// Access token under which the process image is created. `None`
    /// until stamped; on static-group platforms it stays `None`.
    access_token: Option<AccessToken>,
}

impl LaunchSpec {
    /// Describe a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: None,
            access_token: None,
        }
    }

    /// Set the argument list.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Append one environment pair.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Build a spec from one payload command line: the program followed
    /// by its arguments. Returns `None` for an empty line; payload
    /// validation rejects those before specs are built.
    #[must_use]
    pub fn from_command_line(line: &[String]) -> Option<Self> {
        let (program, args) = line.split_first()?;
        Some(Self::new(program).with_args(args.iter().cloned()))
    }

    /// The access token the process image will be created under.
    #[must_use]
    pub const fn access_token(&self) -> Option<AccessToken> {
        self.access_token
    }

    /// Stamp the security attribute. Only the session broker calls this,
    /// while holding the task-user context lock.
    pub(crate) fn set_access_token(&mut self, token: AccessToken) {
        self.access_token = Some(token);
    }
}
