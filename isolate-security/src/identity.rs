//! Caller identity

use std::fmt;

use isolate_core::{Error, Result};
use nix::unistd::{Gid, Uid, User, getgid, getuid};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The invoking user, resolved once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    username: String,
    uid: u32,
    gid: u32,
}

impl CallerIdentity {
    /// Resolve the real uid/gid of this process against the passwd database
    ///
    /// # Errors
    /// Returns [`Error::Identity`] if there is no passwd entry, or the entry
    /// does not match the kernel-reported uid/gid
    pub fn resolve() -> Result<Self> {
        let uid = getuid();
        let gid = getgid();

        let entry = User::from_uid(uid)
            .map_err(|e| Error::Identity {
                message: format!("caller lookup failure: {e}"),
            })?
            .ok_or_else(|| Error::Identity {
                message: format!("caller lookup failure: no passwd entry for uid {uid}"),
            })?;

        let caller = Self::verify(entry.name, (entry.uid, entry.gid), (uid, gid))?;
        debug!(caller = %caller, "resolved caller");
        Ok(caller)
    }

    /// Build an identity from already trusted parts
    #[must_use]
    pub fn from_parts(username: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            username: username.into(),
            uid,
            gid,
        }
    }

    fn verify(username: String, entry: (Uid, Gid), actual: (Uid, Gid)) -> Result<Self> {
        if username.is_empty() {
            return Err(Error::Identity {
                message: "caller lookup failure: empty user name".to_string(),
            });
        }
        if entry.0 != actual.0 {
            return Err(Error::Identity {
                message: format!("caller {username}: uid mismatch"),
            });
        }
        if entry.1 != actual.1 {
            return Err(Error::Identity {
                message: format!("caller {username}: gid mismatch"),
            });
        }

        Ok(Self {
            username,
            uid: actual.0.as_raw(),
            gid: actual.1.as_raw(),
        })
    }

    /// User name
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Real user id
    #[must_use]
    pub const fn uid(&self) -> u32 {
        self.uid
    }

    /// Real group id
    #[must_use]
    pub const fn gid(&self) -> u32 {
        self.gid
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.username, self.uid, self.gid)
    }
}
