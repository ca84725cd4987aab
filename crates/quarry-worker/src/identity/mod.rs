//! Platform identity capability: group resolution, membership
//! administration, and login-session custody for task users.
//!
//! The isolation manager depends only on [`IdentityProvider`]. Two
//! in-tree variants cover the supported identity models:
//!
//! - [`provider::StaticGroupIdentity`] edits static membership in the
//!   host's group database (POSIX hosts, through
//!   [`posix::PosixGroupAdmin`]).
//! - [`provider::SessionTokenIdentity`] additionally owns a lock-guarded
//!   login-session broker whose access tokens are stamped onto launch
//!   descriptors (see [`session::SessionBroker`]).
//!
//! Which variant a deployment wires is decided once at worker start; the
//! isolation manager never branches on the platform itself.

pub mod provider;
pub mod session;

#[cfg(unix)]
pub mod posix;

use std::fmt;

use secrecy::SecretString;
use thiserror::Error;

use self::session::SessionError;
use crate::launch::LaunchSpec;

pub use self::provider::{SessionTokenIdentity, StaticGroupIdentity};
pub use self::session::{AccessToken, LoginSession, SessionBackend, SessionBroker};

#[cfg(unix)]
pub use self::posix::PosixGroupAdmin;

/// Identity model implemented by the platform capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationModel {
    /// Privileges derive from static group membership in the host's
    /// group database.
    StaticGroups,
    /// Privileges derive from the login session whose access token
    /// creates the process image.
    SessionToken,
}

impl IsolationModel {
    /// `true` when launch descriptors must be stamped with session tokens.
    #[must_use]
    pub const fn uses_session_tokens(self) -> bool {
        matches!(self, Self::SessionToken)
    }
}

impl fmt::Display for IsolationModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaticGroups => f.write_str("static-groups"),
            Self::SessionToken => f.write_str("session-token"),
        }
    }
}

/// A resolved OS group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsGroup {
    /// Group name as known to the host.
    pub name: String,
    /// Numeric group id.
    pub gid: u32,
    /// Member user names, as reported at resolution time.
    pub members: Vec<String>,
}

/// Name and credential secret of a provisioned task user.
#[derive(Debug)]
pub struct TaskCredentials {
    user: String,
    secret: SecretString,
}

impl TaskCredentials {
    /// Bundle a task user's account name with its credential secret.
    #[must_use]
    pub fn new(user: impl Into<String>, secret: SecretString) -> Self {
        Self {
            user: user.into(),
            secret,
        }
    }

    /// Account name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Credential secret.
    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }

    pub(crate) fn into_parts(self) -> (String, SecretString) {
        (self.user, self.secret)
    }
}

/// Result of a membership-add request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipChange {
    /// The user was added; teardown must remove them again.
    Added,
    /// The user was already a member; teardown leaves the membership
    /// alone.
    AlreadyMember,
}

impl MembershipChange {
    /// `true` when a membership was actually added.
    #[must_use]
    pub const fn was_added(self) -> bool {
        matches!(self, Self::Added)
    }
}

/// Errors from platform identity operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IdentityError {
    /// The requested group does not exist on this host.
    #[error("no such os group '{name}' on this host")]
    UnknownGroup {
        /// The requested group name.
        name: String,
    },

    /// The host's group database could not be queried.
    #[error("failed to look up os group '{name}': {reason}")]
    GroupLookup {
        /// The requested group name.
        name: String,
        /// Underlying cause.
        reason: String,
    },

    /// Adding the task user to a group failed.
    #[error("failed to add user '{user}' to os group '{group}': {reason}")]
    MembershipAdd {
        /// Group the user was being added to.
        group: String,
        /// The task user.
        user: String,
        /// Underlying cause.
        reason: String,
    },

    /// Removing the task user from a group failed.
    #[error("failed to remove user '{user}' from os group '{group}': {reason}")]
    MembershipRemove {
        /// Group the user was being removed from.
        group: String,
        /// The task user.
        user: String,
        /// Underlying cause.
        reason: String,
    },

    /// A login-session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl IdentityError {
    /// `true` when the error names a group that simply does not exist,
    /// which is a payload-authoring problem rather than a host fault.
    #[must_use]
    pub const fn is_unknown_group(&self) -> bool {
        matches!(self, Self::UnknownGroup { .. })
    }
}

/// Group database operations behind the identity providers.
///
/// Implemented by [`posix::PosixGroupAdmin`] on real hosts and by
/// recording fakes in tests.
pub trait GroupAdmin: Send + Sync {
    /// Look up a group by name, `Ok(None)` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error when the group database cannot be queried.
    fn lookup(&self, name: &str) -> Result<Option<OsGroup>, IdentityError>;

    /// Add `user` to `group`.
    ///
    /// # Errors
    ///
    /// Returns an error when the membership change is denied or fails.
    fn add_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError>;

    /// Remove `user` from `group`.
    ///
    /// # Errors
    ///
    /// Returns an error when the membership change is denied or fails.
    fn remove_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError>;
}

/// Platform identity capability consumed by the isolation manager.
///
/// One instance exists per worker process and is shared by every
/// execution slot.
pub trait IdentityProvider: Send + Sync {
    /// Which identity model this provider implements.
    fn model(&self) -> IsolationModel;

    /// Resolve a group by name.
    ///
    /// # Errors
    ///
    /// [`IdentityError::UnknownGroup`] when the name does not exist on
    /// this host; [`IdentityError::GroupLookup`] when the database could
    /// not be queried.
    fn resolve_group(&self, name: &str) -> Result<OsGroup, IdentityError>;

    /// Add the task user to a resolved group, reporting whether a change
    /// was made.
    ///
    /// # Errors
    ///
    /// Returns an error when the membership change fails.
    fn add_member(&self, user: &str, group: &OsGroup) -> Result<MembershipChange, IdentityError>;

    /// Remove the task user from a resolved group.
    ///
    /// # Errors
    ///
    /// Returns an error when the membership change fails.
    fn remove_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError>;

    /// Refresh the task user's login session and stamp the fresh access
    /// token onto every descriptor, as one critical section.
    ///
    /// Providers whose model has no session tokens return `Ok(None)` and
    /// leave the descriptors untouched.
    ///
    /// # Errors
    ///
    /// Returns an error when the session cannot be established. The
    /// previous token, if any, remains observable and no descriptor is
    /// modified.
    fn refresh_and_stamp(
        &self,
        specs: &mut [LaunchSpec],
    ) -> Result<Option<AccessToken>, IdentityError>;

    /// The current access token, if the model has one and a session has
    /// been established.
    fn current_token(&self) -> Option<AccessToken>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_models_classify_token_use() {
        assert!(!IsolationModel::StaticGroups.uses_session_tokens());
        assert!(IsolationModel::SessionToken.uses_session_tokens());
        assert_eq!(IsolationModel::StaticGroups.to_string(), "static-groups");
        assert_eq!(IsolationModel::SessionToken.to_string(), "session-token");
    }

    #[test]
    fn membership_change_reports_additions() {
        assert!(MembershipChange::Added.was_added());
        assert!(!MembershipChange::AlreadyMember.was_added());
    }

    #[test]
    fn unknown_group_is_classified() {
        let err = IdentityError::UnknownGroup {
            name: "ghosts".to_string(),
        };
        assert!(err.is_unknown_group());
        assert!(err.to_string().contains("ghosts"), "message: {err}");

        let err = IdentityError::GroupLookup {
            name: "ghosts".to_string(),
            reason: "database offline".to_string(),
        };
        assert!(!err.is_unknown_group());
    }

    #[test]
    fn credentials_debug_never_exposes_the_secret() {
        let credentials =
            TaskCredentials::new("task-3", SecretString::from("hunter2".to_string()));
        let debug = format!("{credentials:?}");
        assert!(!debug.contains("hunter2"), "debug leaked the secret: {debug}");
        assert_eq!(credentials.user(), "task-3");
    }
}
