//! Isolate Core - Foundation types and process plumbing
//!
//! This crate provides the pieces shared by every process role:
//! the error taxonomy and its exit codes, the command channel used for
//! the launcher/builder handshake, and the resource limit table.

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod channel;
pub mod error;
pub mod resources;
pub mod types;

pub use channel::{Channel, Command};
pub use error::{Error, ExitCode, Result};
pub use resources::{RlimitKind, RlimitSlot, RlimitTable};
pub use types::ProcessId;
