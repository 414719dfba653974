//! Security features for isolated commands
//!
//! This crate provides:
//! - Descriptor hygiene (close-on-exec for every inherited descriptor)
//! - Caller identity lookup and validation

#![warn(missing_docs, clippy::all, clippy::pedantic)]

pub mod fds;
pub mod identity;

pub use fds::mark_close_on_exec_all;
pub use identity::CallerIdentity;
