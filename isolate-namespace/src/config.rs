//! Namespace and isolation configuration

use std::fmt;
use std::path::{Path, PathBuf};

use isolate_core::{Error, Result, RlimitTable};
use isolate_security::CallerIdentity;
use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::idmap::IdMapping;

/// Kinds of namespaces that can be detached, in unshare order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// User namespace (uid/gid remapping)
    User,
    /// Mount namespace
    Mount,
    /// Filesystem attributes (root, cwd, umask)
    Filesystem,
    /// Hostname and domain name
    Uts,
    /// System V IPC and POSIX message queues
    Ipc,
    /// Network stack
    Net,
    /// Process id space
    Pid,
    /// System V semaphore undo values
    Sysvsem,
    /// Cgroup root directory
    Cgroup,
    /// Boot and monotonic clocks
    Time,
}

impl NamespaceKind {
    /// Every known namespace kind
    pub const ALL: [Self; 10] = [
        Self::User,
        Self::Mount,
        Self::Filesystem,
        Self::Uts,
        Self::Ipc,
        Self::Net,
        Self::Pid,
        Self::Sysvsem,
        Self::Cgroup,
        Self::Time,
    ];

    /// Name used in namespace lists
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Mount => "mount",
            Self::Filesystem => "filesystem",
            Self::Uts => "uts",
            Self::Ipc => "ipc",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Sysvsem => "sysvsem",
            Self::Cgroup => "cgroup",
            Self::Time => "time",
        }
    }

    /// Name of the clone(2) flag, for diagnostics
    #[must_use]
    pub const fn clone_name(self) -> &'static str {
        match self {
            Self::User => "CLONE_NEWUSER",
            Self::Mount => "CLONE_NEWNS",
            Self::Filesystem => "CLONE_FS",
            Self::Uts => "CLONE_NEWUTS",
            Self::Ipc => "CLONE_NEWIPC",
            Self::Net => "CLONE_NEWNET",
            Self::Pid => "CLONE_NEWPID",
            Self::Sysvsem => "CLONE_SYSVSEM",
            Self::Cgroup => "CLONE_NEWCGROUP",
            Self::Time => "CLONE_NEWTIME",
        }
    }

    /// Flag passed to unshare(2)
    #[must_use]
    pub const fn clone_flag(self) -> CloneFlags {
        match self {
            Self::User => CloneFlags::CLONE_NEWUSER,
            Self::Mount => CloneFlags::CLONE_NEWNS,
            Self::Filesystem => CloneFlags::CLONE_FS,
            Self::Uts => CloneFlags::CLONE_NEWUTS,
            Self::Ipc => CloneFlags::CLONE_NEWIPC,
            Self::Net => CloneFlags::CLONE_NEWNET,
            Self::Pid => CloneFlags::CLONE_NEWPID,
            Self::Sysvsem => CloneFlags::CLONE_SYSVSEM,
            Self::Cgroup => CloneFlags::CLONE_NEWCGROUP,
            Self::Time => CloneFlags::from_bits_retain(libc::CLONE_NEWTIME),
        }
    }

    /// Match a list token against the name table
    ///
    /// Case-insensitive; the token only has to start with a known name, so
    /// `network` selects `net`.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| starts_with_ignore_case(token, kind.name()))
    }

    const fn bit(self) -> u32 {
        1 << self as u32
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn starts_with_ignore_case(token: &str, prefix: &str) -> bool {
    token
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Namespace flags for bitwise operations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceFlags(u32);

impl NamespaceFlags {
    /// User namespace flag
    pub const USER: Self = Self(NamespaceKind::User.bit());
    /// Mount namespace flag
    pub const MOUNT: Self = Self(NamespaceKind::Mount.bit());
    /// Filesystem attribute flag
    pub const FILESYSTEM: Self = Self(NamespaceKind::Filesystem.bit());
    /// UTS namespace flag
    pub const UTS: Self = Self(NamespaceKind::Uts.bit());
    /// IPC namespace flag
    pub const IPC: Self = Self(NamespaceKind::Ipc.bit());
    /// Network namespace flag
    pub const NET: Self = Self(NamespaceKind::Net.bit());
    /// PID namespace flag
    pub const PID: Self = Self(NamespaceKind::Pid.bit());
    /// System V semaphore flag
    pub const SYSVSEM: Self = Self(NamespaceKind::Sysvsem.bit());
    /// CGroup namespace flag
    pub const CGROUP: Self = Self(NamespaceKind::Cgroup.bit());
    /// Time namespace flag
    pub const TIME: Self = Self(NamespaceKind::Time.bit());

    /// Namespaces every isolated command gets
    pub const BASELINE: Self = Self(Self::USER.0 | Self::PID.0 | Self::MOUNT.0);
    /// All namespaces
    pub const ALL: Self = Self((1 << NamespaceKind::ALL.len()) - 1);
    /// No namespaces
    pub const NONE: Self = Self(0);

    /// Check if flag is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if no flag is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if the namespace kind is selected
    #[must_use]
    pub const fn has(self, kind: NamespaceKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Selected kinds, in unshare order
    pub fn kinds(self) -> impl Iterator<Item = NamespaceKind> {
        NamespaceKind::ALL.into_iter().filter(move |kind| self.has(*kind))
    }

    /// Parse a comma separated namespace list
    ///
    /// Names are matched case-insensitively by prefix; `all` selects every
    /// namespace. Unknown names are reported and skipped, never fatal. The
    /// baseline is not added here, see [`IsolationConfigBuilder`].
    ///
    /// ```
    /// use isolate_namespace::NamespaceFlags;
    ///
    /// let flags = NamespaceFlags::parse("net,UTS,bogus");
    /// assert_eq!(flags, NamespaceFlags::NET | NamespaceFlags::UTS);
    /// ```
    #[must_use]
    pub fn parse(list: &str) -> Self {
        list.split(',')
            .filter(|token| !token.is_empty())
            .fold(Self::NONE, |flags, token| flags | Self::from_token(token))
    }

    fn from_token(token: &str) -> Self {
        if starts_with_ignore_case(token, "all") {
            return Self::ALL;
        }
        NamespaceKind::from_token(token).map_or_else(
            || {
                warn!(name = token, "unknown unshare flag");
                Self::NONE
            },
            |kind| Self(kind.bit()),
        )
    }

    /// Convert to clone flags for unshare(2)
    #[must_use]
    pub fn to_clone_flags(self) -> CloneFlags {
        self.kinds()
            .fold(CloneFlags::empty(), |flags, kind| flags | kind.clone_flag())
    }
}

impl std::ops::BitOr for NamespaceFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for NamespaceFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<NamespaceKind> for NamespaceFlags {
    fn from(kind: NamespaceKind) -> Self {
        Self(kind.bit())
    }
}

impl fmt::Display for NamespaceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.kinds().map(NamespaceKind::name).collect();
        f.write_str(&names.join(","))
    }
}

/// Everything needed to run one isolated command
///
/// Built once from the command line and never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationConfig {
    namespaces: NamespaceFlags,
    root: Option<PathBuf>,
    uid: Option<u32>,
    gid: Option<u32>,
    uid_map: IdMapping,
    gid_map: IdMapping,
    rlimits: RlimitTable,
    environment: Option<Vec<(String, String)>>,
    command: Vec<String>,
}

impl IsolationConfig {
    /// Start building a configuration for `command`
    #[must_use]
    pub fn builder(caller: CallerIdentity, command: Vec<String>) -> IsolationConfigBuilder {
        IsolationConfigBuilder {
            caller,
            command,
            namespaces: NamespaceFlags::NONE,
            root: None,
            uid: None,
            gid: None,
            uid_map: IdMapping::new(),
            gid_map: IdMapping::new(),
            rlimits: RlimitTable::new(),
            environment: None,
        }
    }

    /// Namespaces to detach, baseline included
    #[must_use]
    pub const fn namespaces(&self) -> NamespaceFlags {
        self.namespaces
    }

    /// New root directory for the command
    #[must_use]
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// User id to switch to inside the namespace
    #[must_use]
    pub const fn uid(&self) -> Option<u32> {
        self.uid
    }

    /// Group id to switch to inside the namespace
    #[must_use]
    pub const fn gid(&self) -> Option<u32> {
        self.gid
    }

    /// UID mapping written for the command process
    #[must_use]
    pub const fn uid_map(&self) -> &IdMapping {
        &self.uid_map
    }

    /// GID mapping written for the command process
    #[must_use]
    pub const fn gid_map(&self) -> &IdMapping {
        &self.gid_map
    }

    /// Resource limits installed before exec
    #[must_use]
    pub const fn rlimits(&self) -> &RlimitTable {
        &self.rlimits
    }

    /// Replacement environment, if any
    #[must_use]
    pub fn environment(&self) -> Option<&[(String, String)]> {
        self.environment.as_deref()
    }

    /// Target program and its arguments
    #[must_use]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Whether identity mappings are installed by the launcher
    #[must_use]
    pub const fn maps_identities(&self) -> bool {
        self.namespaces.contains(NamespaceFlags::USER)
    }
}

/// Builder for [`IsolationConfig`]
#[derive(Debug)]
#[must_use]
pub struct IsolationConfigBuilder {
    caller: CallerIdentity,
    command: Vec<String>,
    namespaces: NamespaceFlags,
    root: Option<PathBuf>,
    uid: Option<u32>,
    gid: Option<u32>,
    uid_map: IdMapping,
    gid_map: IdMapping,
    rlimits: RlimitTable,
    environment: Option<Vec<(String, String)>>,
}

impl IsolationConfigBuilder {
    /// Request additional namespaces
    pub fn with_namespaces(mut self, namespaces: NamespaceFlags) -> Self {
        self.namespaces |= namespaces;
        self
    }

    /// Change the root directory of the command
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    /// Run the command as this user id inside the namespace
    pub const fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Run the command as this group id inside the namespace
    pub const fn with_gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Use an explicit UID mapping
    pub fn with_uid_map(mut self, mapping: IdMapping) -> Self {
        self.uid_map = mapping;
        self
    }

    /// Use an explicit GID mapping
    pub fn with_gid_map(mut self, mapping: IdMapping) -> Self {
        self.gid_map = mapping;
        self
    }

    /// Resource limits for the command
    pub const fn with_rlimits(mut self, rlimits: RlimitTable) -> Self {
        self.rlimits = rlimits;
        self
    }

    /// Replace the command's environment entirely
    pub fn with_environment(mut self, environment: Vec<(String, String)>) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Finish the configuration
    ///
    /// Adds the baseline namespaces and, when no explicit mapping was given,
    /// maps the inside id (or the caller's own id) onto the caller.
    ///
    /// # Errors
    /// Returns a usage error for an empty command, or a configuration error
    /// if the command or environment contain NUL bytes
    pub fn build(self) -> Result<IsolationConfig> {
        if self.command.is_empty() {
            return Err(Error::Usage {
                message: "more arguments required".to_string(),
            });
        }

        let has_nul = |s: &String| s.contains('\0');
        if self.command.iter().any(has_nul) {
            return Err(Error::config("command contains a NUL byte"));
        }
        if let Some(env) = &self.environment
            && env.iter().any(|(name, value)| has_nul(name) || has_nul(value))
        {
            return Err(Error::config("environment contains a NUL byte"));
        }

        let uid_map = if self.uid_map.is_empty() {
            IdMapping::single(self.uid.unwrap_or(self.caller.uid()), self.caller.uid())
        } else {
            self.uid_map
        };
        let gid_map = if self.gid_map.is_empty() {
            IdMapping::single(self.gid.unwrap_or(self.caller.gid()), self.caller.gid())
        } else {
            self.gid_map
        };

        Ok(IsolationConfig {
            namespaces: self.namespaces | NamespaceFlags::BASELINE,
            root: self.root,
            uid: self.uid,
            gid: self.gid,
            uid_map,
            gid_map,
            rlimits: self.rlimits,
            environment: self.environment,
            command: self.command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> CallerIdentity {
        CallerIdentity::from_parts("alice", 1000, 100)
    }

    fn command() -> Vec<String> {
        vec!["/bin/true".to_string()]
    }

    #[test]
    fn test_parse_net_uts() {
        let config = IsolationConfig::builder(caller(), command())
            .with_namespaces(NamespaceFlags::parse("net,uts"))
            .build()
            .unwrap();

        assert_eq!(
            config.namespaces(),
            NamespaceFlags::USER
                | NamespaceFlags::PID
                | NamespaceFlags::MOUNT
                | NamespaceFlags::NET
                | NamespaceFlags::UTS
        );
    }

    #[test]
    fn test_parse_is_case_insensitive_prefix() {
        assert_eq!(NamespaceFlags::parse("NET"), NamespaceFlags::NET);
        assert_eq!(NamespaceFlags::parse("network"), NamespaceFlags::NET);
        assert_eq!(NamespaceFlags::parse("Users"), NamespaceFlags::USER);
        assert_eq!(NamespaceFlags::parse("ne"), NamespaceFlags::NONE);
    }

    #[test]
    fn test_parse_all() {
        assert_eq!(NamespaceFlags::parse("all"), NamespaceFlags::ALL);
        assert_eq!(NamespaceFlags::parse("ALL,net"), NamespaceFlags::ALL);
        assert_eq!(NamespaceFlags::ALL.kinds().count(), NamespaceKind::ALL.len());
    }

    #[test]
    fn test_unknown_names_do_not_abort() {
        assert_eq!(
            NamespaceFlags::parse("bogus,ipc,,nope"),
            NamespaceFlags::IPC
        );
        assert_eq!(NamespaceFlags::parse(""), NamespaceFlags::NONE);
    }

    #[test]
    fn test_parse_order_independent_and_idempotent() {
        let lists = ["net,uts,ipc", "ipc,net,uts", "uts,uts,ipc,net,net"];
        let first = NamespaceFlags::parse(lists[0]) | NamespaceFlags::BASELINE;
        for list in lists {
            let flags = NamespaceFlags::parse(list) | NamespaceFlags::BASELINE;
            assert_eq!(flags, first);
            assert_eq!(flags | NamespaceFlags::BASELINE, flags);
        }
    }

    #[test]
    fn test_kinds_follow_unshare_order() {
        let flags = NamespaceFlags::PID | NamespaceFlags::USER | NamespaceFlags::NET;
        let kinds: Vec<_> = flags.kinds().collect();
        assert_eq!(
            kinds,
            vec![NamespaceKind::User, NamespaceKind::Net, NamespaceKind::Pid]
        );
        assert_eq!(flags.to_string(), "user,net,pid");
    }

    #[test]
    fn test_clone_flags_conversion() {
        let flags = (NamespaceFlags::BASELINE | NamespaceFlags::TIME).to_clone_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWUSER));
        assert!(flags.contains(CloneFlags::CLONE_NEWPID));
        assert!(flags.contains(CloneFlags::CLONE_NEWNS));
        assert_eq!(flags.bits() & libc::CLONE_NEWTIME, libc::CLONE_NEWTIME);
        assert!(!flags.contains(CloneFlags::CLONE_NEWNET));
    }

    #[test]
    fn test_default_mapping_is_caller_identity() {
        let config = IsolationConfig::builder(caller(), command()).build().unwrap();
        assert_eq!(config.uid_map().to_string(), "1000 1000 1");
        assert_eq!(config.gid_map().to_string(), "100 100 1");
        assert!(config.maps_identities());
    }

    #[test]
    fn test_inside_ids_shape_default_mapping() {
        let config = IsolationConfig::builder(caller(), command())
            .with_uid(0)
            .with_gid(0)
            .build()
            .unwrap();
        assert_eq!(config.uid_map().to_string(), "0 1000 1");
        assert_eq!(config.gid_map().to_string(), "0 100 1");
    }

    #[test]
    fn test_explicit_mapping_wins() {
        let mut uid_map = IdMapping::new();
        uid_map.parse_append("0:100000:65536").unwrap();

        let config = IsolationConfig::builder(caller(), command())
            .with_uid(0)
            .with_uid_map(uid_map)
            .build()
            .unwrap();
        assert_eq!(config.uid_map().to_string(), "0 100000 65536");
        assert_eq!(config.gid_map().to_string(), "100 100 1");
    }

    #[test]
    fn test_empty_command_is_usage_error() {
        let err = IsolationConfig::builder(caller(), Vec::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Usage { .. }));
    }

    #[test]
    fn test_nul_in_environment_rejected() {
        let err = IsolationConfig::builder(caller(), command())
            .with_environment(vec![("A".into(), "b\0c".into())])
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_config_serializes() {
        let config = IsolationConfig::builder(caller(), command())
            .with_root("/srv/root")
            .build()
            .unwrap();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["root"], "/srv/root");
        assert_eq!(json["command"][0], "/bin/true");
    }
}
