//! Namespace detachment and identity mapping
//!
//! Mapping files under `/proc/<pid>/` are the only state shared between the
//! launcher and the command process. They are written exactly once, by the
//! launcher alone, while the command process is parked waiting for its exec
//! grant.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use isolate_core::{Error, ProcessId, Result};
use nix::sched::unshare;
use tracing::debug;

use crate::config::NamespaceFlags;
use crate::idmap::{IdKind, IdMapping};

/// Default procfs mount point
pub const PROC_ROOT: &str = "/proc";

/// Namespace manager for creating namespaces and mapping identities
#[derive(Debug, Clone)]
pub struct NamespaceManager {
    flags: NamespaceFlags,
    proc_root: PathBuf,
}

impl NamespaceManager {
    /// Create a new namespace manager
    #[must_use]
    pub fn new(flags: NamespaceFlags) -> Self {
        Self {
            flags,
            proc_root: PathBuf::from(PROC_ROOT),
        }
    }

    /// Use a different procfs root
    #[must_use]
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }

    /// Get the configured namespaces
    #[must_use]
    pub const fn flags(&self) -> NamespaceFlags {
        self.flags
    }

    /// Detach the current process from every configured namespace
    ///
    /// Namespaces are unshared one at a time, user namespace first, so the
    /// capabilities it grants cover the rest. A PID namespace only applies
    /// to children forked afterwards.
    ///
    /// # Errors
    /// Returns error naming the first namespace that could not be unshared;
    /// namespaces detached before it stay detached
    pub fn detach(&self) -> Result<()> {
        for kind in self.flags.kinds() {
            debug!(namespace = %kind, flag = kind.clone_name(), "unshare namespace");

            unshare(kind.clone_flag()).map_err(Error::system(format!(
                "unshare({})",
                kind.clone_name()
            )))?;
        }

        Ok(())
    }

    /// Refuse setgroups(2) inside `pid`'s user namespace
    ///
    /// # Errors
    /// Returns error if the control file cannot be written
    pub fn deny_setgroups(&self, pid: ProcessId) -> Result<()> {
        debug!(%pid, value = "deny", "set setgroups");
        self.write_control(pid, "setgroups", "deny\n")
    }

    /// Write one id mapping for `pid`
    ///
    /// The whole mapping goes out in a single write, as the kernel accepts a
    /// map file only once.
    ///
    /// # Errors
    /// Returns error if the map file cannot be opened or is only partially written
    pub fn write_mapping(&self, pid: ProcessId, kind: IdKind, mapping: &IdMapping) -> Result<()> {
        for entry in mapping.entries() {
            debug!(
                %pid,
                %kind,
                inside = entry.inside,
                outside = entry.outside,
                count = entry.count,
                "remap"
            );
        }
        self.write_control(pid, kind.map_file(), &mapping.to_string())
    }

    /// Install both mappings for `pid`
    ///
    /// setgroups is denied first, then the gid map and the uid map are
    /// written. Any failure stops the sequence.
    ///
    /// # Errors
    /// Returns error if any control file write fails
    pub fn install_mappings(
        &self,
        pid: ProcessId,
        uid_map: &IdMapping,
        gid_map: &IdMapping,
    ) -> Result<()> {
        self.deny_setgroups(pid)?;
        self.write_mapping(pid, IdKind::Group, gid_map)?;
        self.write_mapping(pid, IdKind::User, uid_map)
    }

    fn control_path(&self, pid: ProcessId, name: &str) -> PathBuf {
        self.proc_root.join(pid.to_string()).join(name)
    }

    fn write_control(&self, pid: ProcessId, name: &str, content: &str) -> Result<()> {
        let path = self.control_path(pid, name);
        write_once(&path, content.as_bytes()).map_err(|source| Error::ProcFs { path, source })
    }
}

fn write_once(path: &Path, content: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;

    let written = loop {
        match file.write(content) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            result => break result?,
        }
    };

    if written != content.len() {
        return Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("partial write ({written} of {} bytes)", content.len()),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn fake_proc(pid: ProcessId) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let pid_dir = dir.path().join(pid.to_string());
        fs::create_dir(&pid_dir).unwrap();
        for name in ["setgroups", "uid_map", "gid_map"] {
            fs::write(pid_dir.join(name), "").unwrap();
        }
        dir
    }

    #[test]
    fn test_manager_creation() {
        let manager = NamespaceManager::new(NamespaceFlags::BASELINE);
        assert_eq!(manager.flags(), NamespaceFlags::BASELINE);
        assert_eq!(
            manager.control_path(ProcessId::from_raw(7), "uid_map"),
            PathBuf::from("/proc/7/uid_map")
        );
    }

    #[test]
    fn test_detach_nothing() {
        NamespaceManager::new(NamespaceFlags::NONE).detach().unwrap();
    }

    #[test]
    fn test_install_mappings_writes_all_files() {
        let pid = ProcessId::from_raw(4321);
        let proc_root = fake_proc(pid);
        let manager = NamespaceManager::new(NamespaceFlags::BASELINE).with_proc_root(proc_root.path());

        let uid_map = IdMapping::single(0, 1000);
        let mut gid_map = IdMapping::new();
        gid_map.parse_append("0:100:1,1:200000:10").unwrap();

        manager.install_mappings(pid, &uid_map, &gid_map).unwrap();

        let read = |name| fs::read_to_string(proc_root.path().join("4321").join(name)).unwrap();
        assert_eq!(read("setgroups"), "deny\n");
        assert_eq!(read("uid_map"), "0 1000 1");
        assert_eq!(read("gid_map"), "0 100 1\n1 200000 10");
    }

    #[test]
    fn test_missing_setgroups_aborts_mapping() {
        let pid = ProcessId::from_raw(99);
        let proc_root = fake_proc(pid);
        fs::remove_file(proc_root.path().join("99").join("setgroups")).unwrap();
        let manager = NamespaceManager::new(NamespaceFlags::BASELINE).with_proc_root(proc_root.path());

        let err = manager
            .install_mappings(pid, &IdMapping::single(0, 0), &IdMapping::single(0, 0))
            .unwrap_err();

        assert!(matches!(err, Error::ProcFs { .. }));
        assert_eq!(err.exit_code(), isolate_core::ExitCode::OsErr);
        let uid_map = fs::read_to_string(proc_root.path().join("99").join("uid_map")).unwrap();
        assert!(uid_map.is_empty());
    }

    #[test]
    fn test_map_file_is_not_created() {
        let dir = tempfile::tempdir().unwrap();
        let manager = NamespaceManager::new(NamespaceFlags::BASELINE).with_proc_root(dir.path());

        let result = manager.write_mapping(ProcessId::from_raw(1), IdKind::User, &IdMapping::single(0, 0));
        assert!(result.is_err());
        assert!(!dir.path().join("1").exists());
    }
}
