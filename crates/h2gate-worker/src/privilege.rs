//! Dropping root privileges.
//!
//! The parent needs root to bind privileged ports and read key material; the
//! worker gives it up before touching any peer-controlled input. The drop
//! happens exactly once, after the listening sockets are adopted and ticket
//! key files are read, and before the IPC channel is armed.

use nix::unistd::{self, Gid, Uid, User};
use std::ffi::CString;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum PrivilegeError {
    #[error("unknown user: {0}")]
    UnknownUser(String),
    #[error("could not look up user {0}: {1}")]
    Lookup(String, nix::Error),
    #[error("could not change supplementary groups: {0}")]
    Initgroups(nix::Error),
    #[error("could not change gid: {0}")]
    Setgid(nix::Error),
    #[error("could not change uid: {0}")]
    Setuid(nix::Error),
    #[error("still have root privileges after dropping them")]
    StillRoot,
}

/// Switch to the configured user when running as root.
///
/// No-op when no user is configured, when the effective UID is already
/// unprivileged, or when the configured user is root itself. After the
/// switch, regaining root must fail; if it does not, the caller aborts
/// startup.
pub fn drop_privileges(user: Option<&str>) -> Result<(), PrivilegeError> {
    let Some(name) = user else {
        return Ok(());
    };

    if !Uid::effective().is_root() {
        return Ok(());
    }

    let entry = User::from_name(name)
        .map_err(|e| PrivilegeError::Lookup(name.to_string(), e))?
        .ok_or_else(|| PrivilegeError::UnknownUser(name.to_string()))?;

    if entry.uid.is_root() {
        return Ok(());
    }

    let cname =
        CString::new(name).map_err(|_| PrivilegeError::UnknownUser(name.to_string()))?;

    unistd::initgroups(&cname, entry.gid).map_err(PrivilegeError::Initgroups)?;
    unistd::setgid(entry.gid).map_err(PrivilegeError::Setgid)?;
    unistd::setuid(entry.uid).map_err(PrivilegeError::Setuid)?;

    if unistd::setuid(Uid::from_raw(0)).is_ok() {
        return Err(PrivilegeError::StillRoot);
    }

    info!(user = name, uid = %entry.uid, gid = %entry.gid, "Dropped privileges");
    Ok(())
}

/// Resolve a configured user name to its numeric ids, for logging and
/// validation before the actual drop.
pub fn resolve_user(name: &str) -> Result<(Uid, Gid), PrivilegeError> {
    let entry = User::from_name(name)
        .map_err(|e| PrivilegeError::Lookup(name.to_string(), e))?
        .ok_or_else(|| PrivilegeError::UnknownUser(name.to_string()))?;
    Ok((entry.uid, entry.gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_user_is_noop() {
        drop_privileges(None).unwrap();
    }

    #[test]
    fn test_unprivileged_is_noop() {
        // When the test runs without root there is nothing to drop; any
        // configured name is accepted untouched.
        if !Uid::effective().is_root() {
            drop_privileges(Some("nobody")).unwrap();
        }
    }

    #[test]
    fn test_resolve_root() {
        let (uid, _gid) = resolve_user("root").unwrap();
        assert!(uid.is_root());
    }

    #[test]
    fn test_resolve_unknown_user() {
        assert!(matches!(
            resolve_user("h2gate-no-such-user"),
            Err(PrivilegeError::UnknownUser(_))
        ));
    }
}
