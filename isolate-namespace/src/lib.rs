//! Namespace management for process isolation
//!
//! This crate provides Linux namespace isolation for a single command:
//! - Namespace flag sets parsed from `user,pid,net`-style lists
//! - UID/GID mapping records for user namespaces
//! - Namespace detachment and procfs mapping writes
//! - The launcher/builder/command process handshake that ties them together

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod config;
pub mod executor;
pub mod idmap;
pub mod manager;

pub use config::{IsolationConfig, IsolationConfigBuilder, NamespaceFlags, NamespaceKind};
pub use executor::{HostBackend, Launcher, LauncherBackend};
pub use idmap::{IdKind, IdMap, IdMapping};
pub use manager::NamespaceManager;
