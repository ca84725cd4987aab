//! In-tree identity provider variants.

use super::session::{AccessToken, SessionBackend, SessionBroker};
use super::{GroupAdmin, IdentityError, IdentityProvider, IsolationModel, MembershipChange, OsGroup};
use crate::launch::LaunchSpec;

fn resolve_with<A: GroupAdmin>(admin: &A, name: &str) -> Result<OsGroup, IdentityError> {
    admin.lookup(name)?.ok_or_else(|| IdentityError::UnknownGroup {
        name: name.to_string(),
    })
}

fn add_with<A: GroupAdmin>(
    admin: &A,
    user: &str,
    group: &OsGroup,
) -> Result<MembershipChange, IdentityError> {
    if group.members.iter().any(|member| member == user) {
        return Ok(MembershipChange::AlreadyMember);
    }
    admin.add_member(user, group)?;
    Ok(MembershipChange::Added)
}

/// Identity provider for hosts where task privileges derive from static
/// group membership.
#[derive(Debug)]
pub struct StaticGroupIdentity<A: GroupAdmin> {
    admin: A,
}

impl<A: GroupAdmin> StaticGroupIdentity<A> {
    /// Wrap a group administrator.
    #[must_use]
    pub fn new(admin: A) -> Self {
        Self { admin }
    }
}

impl<A: GroupAdmin> IdentityProvider for StaticGroupIdentity<A> {
    fn model(&self) -> IsolationModel {
        IsolationModel::StaticGroups
    }

    fn resolve_group(&self, name: &str) -> Result<OsGroup, IdentityError> {
        resolve_with(&self.admin, name)
    }

    fn add_member(&self, user: &str, group: &OsGroup) -> Result<MembershipChange, IdentityError> {
        add_with(&self.admin, user, group)
    }

    fn remove_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError> {
        self.admin.remove_member(user, group)
    }

    fn refresh_and_stamp(
        &self,
        _specs: &mut [LaunchSpec],
    ) -> Result<Option<AccessToken>, IdentityError> {
        // Static membership needs no per-command token; descriptors pass
        // through untouched.
        Ok(None)
    }

    fn current_token(&self) -> Option<AccessToken> {
        None
    }
}

/// Identity provider for platforms where task privileges derive from the
/// login session that creates the process image.
#[derive(Debug)]
pub struct SessionTokenIdentity<A: GroupAdmin, B: SessionBackend> {
    admin: A,
    broker: SessionBroker<B>,
}

impl<A: GroupAdmin, B: SessionBackend> SessionTokenIdentity<A, B> {
    /// Wrap a group administrator and a session backend.
    #[must_use]
    pub fn new(admin: A, backend: B) -> Self {
        Self {
            admin,
            broker: SessionBroker::new(backend),
        }
    }

    /// The session broker, for task-user provisioning and diagnostics.
    #[must_use]
    pub fn broker(&self) -> &SessionBroker<B> {
        &self.broker
    }
}

impl<A: GroupAdmin, B: SessionBackend> IdentityProvider for SessionTokenIdentity<A, B> {
    fn model(&self) -> IsolationModel {
        IsolationModel::SessionToken
    }

    fn resolve_group(&self, name: &str) -> Result<OsGroup, IdentityError> {
        resolve_with(&self.admin, name)
    }

    fn add_member(&self, user: &str, group: &OsGroup) -> Result<MembershipChange, IdentityError> {
        add_with(&self.admin, user, group)
    }

    fn remove_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError> {
        self.admin.remove_member(user, group)
    }

    fn refresh_and_stamp(
        &self,
        specs: &mut [LaunchSpec],
    ) -> Result<Option<AccessToken>, IdentityError> {
        let token = self.broker.refresh_and_stamp(specs)?;
        Ok(Some(token))
    }

    fn current_token(&self) -> Option<AccessToken> {
        // A poisoned context lock means no token can be trusted.
        self.broker.current_token().unwrap_or(None)
    }
}

/// The identity provider for this build's host platform.
///
/// POSIX hosts edit static group membership through
/// [`super::posix::PosixGroupAdmin`]; there is no login-session handling
/// to wire.
#[cfg(unix)]
#[must_use]
pub fn platform_identity() -> StaticGroupIdentity<super::posix::PosixGroupAdmin> {
    StaticGroupIdentity::new(super::posix::PosixGroupAdmin::new())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use secrecy::SecretString;

    use super::*;
    use crate::identity::TaskCredentials;
    use crate::identity::session::{LoginSession, SessionError};

    /// Admin over a fixed group table, recording membership edits.
    #[derive(Debug, Default)]
    struct TableAdmin {
        groups: Vec<OsGroup>,
        edits: Mutex<Vec<String>>,
    }

    impl TableAdmin {
        fn with_group(name: &str, members: &[&str]) -> Self {
            Self {
                groups: vec![OsGroup {
                    name: name.to_string(),
                    gid: 990,
                    members: members.iter().map(|m| (*m).to_string()).collect(),
                }],
                edits: Mutex::new(Vec::new()),
            }
        }
    }

    impl GroupAdmin for TableAdmin {
        fn lookup(&self, name: &str) -> Result<Option<OsGroup>, IdentityError> {
            Ok(self.groups.iter().find(|g| g.name == name).cloned())
        }

        fn add_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError> {
            self.edits.lock().unwrap().push(format!("add {user} {}", group.name));
            Ok(())
        }

        fn remove_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError> {
            self.edits.lock().unwrap().push(format!("remove {user} {}", group.name));
            Ok(())
        }
    }

    #[derive(Debug)]
    struct OneShotBackend;

    impl SessionBackend for OneShotBackend {
        fn establish(
            &self,
            user: &str,
            _secret: &SecretString,
        ) -> Result<LoginSession, SessionError> {
            Ok(LoginSession::new(user, 0x77))
        }
    }

    #[test]
    fn static_provider_reports_its_model_and_never_stamps() {
        let provider = StaticGroupIdentity::new(TableAdmin::default());
        assert_eq!(provider.model(), IsolationModel::StaticGroups);
        assert!(provider.current_token().is_none());

        let mut specs = vec![LaunchSpec::new("true")];
        let token = provider.refresh_and_stamp(&mut specs).unwrap();
        assert!(token.is_none());
        assert!(specs[0].access_token().is_none());
    }

    #[test]
    fn resolution_maps_missing_groups_to_unknown_group() {
        let provider = StaticGroupIdentity::new(TableAdmin::default());
        let err = provider.resolve_group("nope").unwrap_err();
        assert!(err.is_unknown_group(), "unexpected error: {err}");
    }

    #[test]
    fn membership_add_detects_existing_members() {
        let admin = TableAdmin::with_group("docker", &["task-1"]);
        let provider = StaticGroupIdentity::new(admin);
        let group = provider.resolve_group("docker").unwrap();

        let change = provider.add_member("task-1", &group).unwrap();
        assert!(!change.was_added());

        let change = provider.add_member("task-2", &group).unwrap();
        assert!(change.was_added());
    }

    #[test]
    fn session_provider_stamps_through_its_broker() {
        let provider = SessionTokenIdentity::new(TableAdmin::default(), OneShotBackend);
        assert_eq!(provider.model(), IsolationModel::SessionToken);
        provider
            .broker()
            .install_user(TaskCredentials::new(
                "task-1",
                SecretString::from("opensesame".to_string()),
            ))
            .unwrap();

        let mut specs = vec![LaunchSpec::new("true"), LaunchSpec::new("false")];
        let token = provider.refresh_and_stamp(&mut specs).unwrap();
        let token = token.expect("session model mints a token");
        assert_eq!(token.generation(), 1);
        for spec in &specs {
            assert_eq!(spec.access_token(), Some(token));
        }
        assert_eq!(provider.current_token(), Some(token));
    }
}
