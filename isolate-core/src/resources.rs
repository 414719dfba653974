//! Resource limit table
//!
//! Limits are collected from `[soft-|hard-]name=value` directives and
//! installed with setrlimit(2) in the command process, right before exec.
//! A value of 0 means "leave the kernel's current value alone".

use std::fmt;

use nix::sys::resource::{Resource, getrlimit, setrlimit};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::{Error, Result};

/// Raw limit value, as understood by the kernel
pub type RawLimit = libc::rlim_t;

/// Value accepted in directives for an unlimited resource
const UNLIMITED: &str = "unlimited";

/// Limitable resources, in table order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RlimitKind {
    /// Virtual memory size
    As,
    /// Core file size
    Core,
    /// CPU time in seconds
    Cpu,
    /// Data segment size
    Data,
    /// Size of files the process may create
    Fsize,
    /// Number of file locks
    Locks,
    /// Locked-in-memory address space
    Memlock,
    /// Number of open files
    Nofile,
    /// Number of processes
    Nproc,
    /// Resident set size
    Rss,
    /// Stack size
    Stack,
}

impl RlimitKind {
    /// Every slot of the table
    pub const ALL: [Self; 11] = [
        Self::As,
        Self::Core,
        Self::Cpu,
        Self::Data,
        Self::Fsize,
        Self::Locks,
        Self::Memlock,
        Self::Nofile,
        Self::Nproc,
        Self::Rss,
        Self::Stack,
    ];

    /// Directive name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::As => "as",
            Self::Core => "core",
            Self::Cpu => "cpu",
            Self::Data => "data",
            Self::Fsize => "fsize",
            Self::Locks => "locks",
            Self::Memlock => "memlock",
            Self::Nofile => "nofile",
            Self::Nproc => "nproc",
            Self::Rss => "rss",
            Self::Stack => "stack",
        }
    }

    /// Look up a slot by directive name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    const fn resource(self) -> Resource {
        match self {
            Self::As => Resource::RLIMIT_AS,
            Self::Core => Resource::RLIMIT_CORE,
            Self::Cpu => Resource::RLIMIT_CPU,
            Self::Data => Resource::RLIMIT_DATA,
            Self::Fsize => Resource::RLIMIT_FSIZE,
            Self::Locks => Resource::RLIMIT_LOCKS,
            Self::Memlock => Resource::RLIMIT_MEMLOCK,
            Self::Nofile => Resource::RLIMIT_NOFILE,
            Self::Nproc => Resource::RLIMIT_NPROC,
            Self::Rss => Resource::RLIMIT_RSS,
            Self::Stack => Resource::RLIMIT_STACK,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for RlimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested soft/hard pair for one resource; 0 leaves a field unchanged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlimitSlot {
    /// Soft limit
    pub soft: RawLimit,
    /// Hard limit
    pub hard: RawLimit,
}

impl RlimitSlot {
    /// Whether any field was requested
    #[must_use]
    pub const fn is_set(self) -> bool {
        self.soft != 0 || self.hard != 0
    }

    /// Combine with the kernel's current `(soft, hard)` pair
    ///
    /// Only requested fields override; the hard limit is raised to at least
    /// the soft limit.
    #[must_use]
    pub const fn resolve(self, current: (RawLimit, RawLimit)) -> (RawLimit, RawLimit) {
        let (mut soft, mut hard) = current;
        if self.soft != 0 {
            soft = self.soft;
        }
        if self.hard != 0 {
            hard = self.hard;
        }
        if hard < soft {
            hard = soft;
        }
        (soft, hard)
    }
}

/// Which field(s) of a slot a directive targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Both,
    Soft,
    Hard,
}

/// Table of resource limits to install before exec
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlimitTable {
    slots: [RlimitSlot; 11],
}

impl RlimitTable {
    /// Create an empty table (every slot unchanged)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the slot for a resource
    #[must_use]
    pub const fn get(&self, kind: RlimitKind) -> RlimitSlot {
        self.slots[kind.index()]
    }

    /// Check if any slot was requested
    #[must_use]
    pub fn has_any(&self) -> bool {
        self.slots.iter().any(|slot| slot.is_set())
    }

    /// Apply a comma separated list of `[soft-|hard-]name=value` directives
    ///
    /// Unknown resource names are ignored. Values are decimal numbers or
    /// `unlimited`.
    ///
    /// ```
    /// use isolate_core::{RlimitKind, RlimitTable};
    ///
    /// let mut table = RlimitTable::new();
    /// table.parse("soft-nofile=256,hard-nofile=1024").unwrap();
    /// assert_eq!(table.get(RlimitKind::Nofile).soft, 256);
    /// assert_eq!(table.get(RlimitKind::Nofile).hard, 1024);
    /// ```
    ///
    /// # Errors
    /// Returns error if a directive has no `=` or its value is not a number
    pub fn parse(&mut self, directives: &str) -> Result<()> {
        for directive in directives.split(',').filter(|d| !d.is_empty()) {
            self.update(directive)?;
        }
        Ok(())
    }

    fn update(&mut self, directive: &str) -> Result<()> {
        let (name, value) = directive.split_once('=').ok_or_else(|| {
            Error::config(format!("rlimit directive without value: {directive}"))
        })?;

        if name.is_empty() {
            return Ok(());
        }

        let (field, name) = if let Some(rest) = name.strip_prefix("soft-") {
            (Field::Soft, rest)
        } else if let Some(rest) = name.strip_prefix("hard-") {
            (Field::Hard, rest)
        } else {
            (Field::Both, name)
        };

        let Some(kind) = RlimitKind::from_name(name) else {
            debug!(directive, "ignoring unknown rlimit");
            return Ok(());
        };

        let value = parse_value(value)
            .ok_or_else(|| Error::config(format!("invalid rlimit value: {directive}")))?;

        let slot = &mut self.slots[kind.index()];
        match field {
            Field::Both => {
                slot.soft = value;
                slot.hard = value;
            }
            Field::Soft => slot.soft = value,
            Field::Hard => slot.hard = value,
        }

        Ok(())
    }

    /// Install every requested limit on the current process
    ///
    /// # Errors
    /// Returns error if getrlimit(2) or setrlimit(2) fails for any slot
    pub fn apply(&self) -> Result<()> {
        for kind in RlimitKind::ALL {
            let current = getrlimit(kind.resource())
                .map_err(Error::system(format!("getrlimit(rlimit_{kind})")))?;

            let slot = self.get(kind);
            if !slot.is_set() {
                continue;
            }

            let (soft, hard) = slot.resolve(current);
            trace!(
                rlimit = %kind,
                soft = %DisplayLimit(soft),
                hard = %DisplayLimit(hard),
                "setting rlimit"
            );

            setrlimit(kind.resource(), soft, hard)
                .map_err(Error::system(format!("setrlimit(rlimit_{kind})")))?;
        }

        Ok(())
    }
}

fn parse_value(value: &str) -> Option<RawLimit> {
    if value.eq_ignore_ascii_case(UNLIMITED) {
        return Some(libc::RLIM_INFINITY);
    }
    value.parse().ok()
}

struct DisplayLimit(RawLimit);

impl fmt::Display for DisplayLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == libc::RLIM_INFINITY {
            f.write_str(UNLIMITED)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_and_hard_directives() {
        let mut table = RlimitTable::new();
        table.parse("soft-nofile=256,hard-nofile=1024").unwrap();

        let slot = table.get(RlimitKind::Nofile);
        assert_eq!(slot.soft, 256);
        assert_eq!(slot.hard, 1024);
    }

    #[test]
    fn test_plain_directive_sets_both() {
        let mut table = RlimitTable::new();
        table.parse("nproc=64").unwrap();
        assert_eq!(
            table.get(RlimitKind::Nproc),
            RlimitSlot { soft: 64, hard: 64 }
        );
    }

    #[test]
    fn test_zero_leaves_slot_unset() {
        let mut table = RlimitTable::new();
        table.parse("memlock=0").unwrap();
        assert!(!table.get(RlimitKind::Memlock).is_set());
        assert!(!table.has_any());
    }

    #[test]
    fn test_unknown_names_are_ignored() {
        let mut table = RlimitTable::new();
        table.parse("bogus=5,soft-bogus=1,cpu=10").unwrap();
        assert_eq!(table.get(RlimitKind::Cpu).soft, 10);
        assert_eq!(
            RlimitKind::ALL
                .into_iter()
                .filter(|k| table.get(*k).is_set())
                .count(),
            1
        );
    }

    #[test]
    fn test_malformed_directives_are_rejected() {
        let mut table = RlimitTable::new();
        assert!(table.parse("nofile").is_err());
        assert!(table.parse("nofile=lots").is_err());
        assert!(table.parse("nofile=-1").is_err());
    }

    #[test]
    fn test_empty_entries_are_skipped() {
        let mut table = RlimitTable::new();
        table.parse(",,stack=8192,").unwrap();
        table.parse("=5").unwrap();
        assert_eq!(table.get(RlimitKind::Stack).soft, 8192);
    }

    #[test]
    fn test_unlimited_value() {
        let mut table = RlimitTable::new();
        table.parse("hard-core=unlimited").unwrap();
        assert_eq!(table.get(RlimitKind::Core).hard, libc::RLIM_INFINITY);
        assert_eq!(table.get(RlimitKind::Core).soft, 0);
    }

    #[test]
    fn test_repeated_directive_is_idempotent() {
        let mut once = RlimitTable::new();
        once.parse("soft-as=4096").unwrap();

        let mut twice = RlimitTable::new();
        twice.parse("soft-as=4096").unwrap();
        twice.parse("soft-as=4096").unwrap();

        assert_eq!(once, twice);
        let current = (100, 200);
        let resolved = once.get(RlimitKind::As).resolve(current);
        assert_eq!(twice.get(RlimitKind::As).resolve(resolved), resolved);
    }

    #[test]
    fn test_resolve_raises_hard_to_soft() {
        let slot = RlimitSlot { soft: 512, hard: 0 };
        assert_eq!(slot.resolve((64, 128)), (512, 512));

        let slot = RlimitSlot { soft: 0, hard: 32 };
        assert_eq!(slot.resolve((64, 128)), (64, 64));
    }

    #[test]
    fn test_resolve_unset_keeps_current() {
        assert_eq!(RlimitSlot::default().resolve((7, 9)), (7, 9));
    }

    #[test]
    fn test_kind_names_round_trip() {
        for kind in RlimitKind::ALL {
            assert_eq!(RlimitKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(RlimitKind::from_name("NOFILE"), None);
    }

    #[test]
    fn test_apply_empty_table_is_noop() {
        RlimitTable::new().apply().unwrap();
    }

    #[test]
    fn test_apply_current_soft_limit() {
        let (soft, _) = getrlimit(Resource::RLIMIT_NOFILE).unwrap();
        let mut table = RlimitTable::new();
        table.parse(&format!("soft-nofile={soft}")).unwrap();
        table.apply().unwrap();
        assert_eq!(getrlimit(Resource::RLIMIT_NOFILE).unwrap().0, soft);
    }
}
