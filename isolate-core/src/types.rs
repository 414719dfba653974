//! Core type definitions with strong typing and validation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Width of the raw payload carried on the command channel
    pub const WIRE_SIZE: usize = std::mem::size_of::<i32>();

    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        Self::from(nix::unistd::getpid())
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Encode as a fixed-width native-endian payload
    #[must_use]
    pub fn encode(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_SIZE);
        buf.put_i32_ne(self.0);
        buf.freeze()
    }

    /// Decode a payload produced by [`ProcessId::encode`]
    ///
    /// Returns `None` when the slice is not exactly [`Self::WIRE_SIZE`] bytes
    /// or the value is not a valid (positive) process id.
    #[must_use]
    pub fn decode(mut raw: &[u8]) -> Option<Self> {
        if raw.len() != Self::WIRE_SIZE {
            return None;
        }
        let pid = raw.get_i32_ne();
        (pid > 0).then_some(Self(pid))
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        Self::from_raw(pid.0)
    }
}
