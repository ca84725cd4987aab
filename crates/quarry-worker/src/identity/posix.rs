//! POSIX group administration.
//!
//! Group resolution reads the host group database through `nix`.
//! Membership edits shell out to the system `gpasswd` tool, which needs
//! the worker to run with enough privilege to edit group membership.
//! Command lines are constructed as pure data first so tests can assert
//! on them without touching the host.

use std::process::Command;

use super::{GroupAdmin, IdentityError, OsGroup};

/// Administration tool used for membership edits.
const ADMIN_TOOL: &str = "gpasswd";

/// Direction of a membership edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEdit {
    /// Add the user to the group.
    Add,
    /// Remove the user from the group.
    Remove,
}

/// Build the `gpasswd` command line for one membership edit.
///
/// Pure construction: the returned vector is the program followed by its
/// arguments, exactly as executed.
#[must_use]
pub fn build_membership_command(edit: MembershipEdit, user: &str, group: &str) -> Vec<String> {
    let flag = match edit {
        MembershipEdit::Add => "--add",
        MembershipEdit::Remove => "--delete",
    };
    vec![
        ADMIN_TOOL.to_string(),
        flag.to_string(),
        user.to_string(),
        group.to_string(),
    ]
}

/// Group administrator for POSIX hosts.
#[derive(Debug, Default)]
pub struct PosixGroupAdmin;

impl PosixGroupAdmin {
    /// Create an administrator that uses the system `gpasswd` tool.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn run_edit(edit: MembershipEdit, user: &str, group: &str) -> Result<(), String> {
        let argv = build_membership_command(edit, user, group);
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .output()
            .map_err(|e| format!("failed to run {ADMIN_TOOL}: {e}"))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        if stderr.is_empty() {
            Err(format!("{ADMIN_TOOL} exited with {}", output.status))
        } else {
            Err(format!("{ADMIN_TOOL} exited with {}: {stderr}", output.status))
        }
    }
}

impl GroupAdmin for PosixGroupAdmin {
    fn lookup(&self, name: &str) -> Result<Option<OsGroup>, IdentityError> {
        match nix::unistd::Group::from_name(name) {
            Ok(Some(group)) => Ok(Some(OsGroup {
                name: group.name,
                gid: group.gid.as_raw(),
                members: group.mem,
            })),
            Ok(None) => Ok(None),
            Err(errno) => Err(IdentityError::GroupLookup {
                name: name.to_string(),
                reason: errno.to_string(),
            }),
        }
    }

    fn add_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError> {
        tracing::debug!(user, group = %group.name, "adding task user to os group");
        Self::run_edit(MembershipEdit::Add, user, &group.name).map_err(|reason| {
            IdentityError::MembershipAdd {
                group: group.name.clone(),
                user: user.to_string(),
                reason,
            }
        })
    }

    fn remove_member(&self, user: &str, group: &OsGroup) -> Result<(), IdentityError> {
        tracing::debug!(user, group = %group.name, "removing task user from os group");
        Self::run_edit(MembershipEdit::Remove, user, &group.name).map_err(|reason| {
            IdentityError::MembershipRemove {
                group: group.name.clone(),
                user: user.to_string(),
                reason,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_command_uses_gpasswd_add_flag() {
        let argv = build_membership_command(MembershipEdit::Add, "task-4", "docker");
        assert_eq!(argv, vec!["gpasswd", "--add", "task-4", "docker"]);
    }

    #[test]
    fn remove_command_uses_gpasswd_delete_flag() {
        let argv = build_membership_command(MembershipEdit::Remove, "task-4", "docker");
        assert_eq!(argv, vec!["gpasswd", "--delete", "task-4", "docker"]);
    }

    #[test]
    fn lookup_of_missing_group_is_none() {
        let admin = PosixGroupAdmin::new();
        let result = admin.lookup("quarry-test-no-such-group");
        assert!(matches!(result, Ok(None)), "unexpected result: {result:?}");
    }

    #[test]
    fn lookup_of_root_group_reports_gid_zero() {
        // Present on every POSIX host the worker targets; tolerate its
        // absence in minimal build environments.
        let admin = PosixGroupAdmin::new();
        if let Ok(Some(group)) = admin.lookup("root") {
            assert_eq!(group.gid, 0);
            assert_eq!(group.name, "root");
        }
    }
}
