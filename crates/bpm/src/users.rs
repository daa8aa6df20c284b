//! Resolution of the unprivileged account that owns job processes.

use bpm_common::{BpmError, BpmResult};

/// The account every job process runs as, by BOSH convention.
pub const VCAP_USER: &str = "vcap";

/// A resolved system user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BpmUser {
    /// Account name.
    pub name: String,
    /// Numeric user ID.
    pub uid: u32,
    /// Numeric primary group ID.
    pub gid: u32,
}

/// Resolves account names to numeric IDs.
pub trait UserFinder: Send + Sync {
    /// Look up a user by name in the system user database.
    ///
    /// # Errors
    ///
    /// [`BpmError::UnknownUser`] when the name is absent,
    /// [`BpmError::UserLookupFailed`] when the database cannot be read.
    fn lookup(&self, name: &str) -> BpmResult<BpmUser>;
}

/// [`UserFinder`] backed by the system user database.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUserFinder;

impl UserFinder for SystemUserFinder {
    fn lookup(&self, name: &str) -> BpmResult<BpmUser> {
        match nix::unistd::User::from_name(name) {
            Ok(Some(user)) => Ok(BpmUser {
                name: user.name,
                uid: user.uid.as_raw(),
                gid: user.gid.as_raw(),
            }),
            Ok(None) => Err(BpmError::UnknownUser {
                name: name.to_string(),
            }),
            Err(errno) => Err(BpmError::UserLookupFailed {
                name: name.to_string(),
                reason: errno.to_string(),
            }),
        }
    }
}
