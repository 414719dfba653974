//! Command channel between cooperating processes
//!
//! A connected pair of stream sockets carrying fixed-width commands. Each
//! handshake step sends exactly one [`Command`]; a command that carries data
//! (the pid report) is followed by a separate fixed-width payload write.
//! Nothing is buffered on either side, so messages are never coalesced or
//! reordered.

use std::fmt;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use tracing::{trace, warn};

use crate::{Error, ProcessId, Result};

/// Handshake message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Unknown tag, or nothing could be read
    Invalid = 0,
    /// Launcher asks the builder to create namespaces and fork
    ForkRequest = 1,
    /// Builder reports the command process id (payload follows)
    PidReport = 2,
    /// Launcher lets the command process exec
    ExecGrant = 3,
}

impl Command {
    /// Encoded width of every command
    pub const WIRE_SIZE: usize = std::mem::size_of::<u32>();

    /// Encode as a fixed-width native-endian tag
    #[must_use]
    pub fn encode(self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::WIRE_SIZE);
        buf.put_u32_ne(self as u32);
        buf.freeze()
    }

    /// Decode a tag; anything malformed or unknown is [`Command::Invalid`]
    #[must_use]
    pub fn decode(mut raw: &[u8]) -> Self {
        if raw.len() != Self::WIRE_SIZE {
            return Self::Invalid;
        }
        match raw.get_u32_ne() {
            1 => Self::ForkRequest,
            2 => Self::PidReport,
            3 => Self::ExecGrant,
            _ => Self::Invalid,
        }
    }

    /// Human readable name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::ForkRequest => "fork-request",
            Self::PidReport => "pid-report",
            Self::ExecGrant => "exec-grant",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One endpoint of the command channel
#[derive(Debug)]
pub struct Channel<S> {
    stream: S,
}

impl Channel<UnixStream> {
    /// Create a connected pair of endpoints
    ///
    /// Both descriptors are close-on-exec, so neither leaks into the
    /// isolated program.
    ///
    /// # Errors
    /// Returns error if socketpair(2) fails
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::SOCK_CLOEXEC,
        )
        .map_err(Error::system("socketpair"))?;

        Ok((
            Self::new(UnixStream::from(left)),
            Self::new(UnixStream::from(right)),
        ))
    }
}

impl<S: Read + Write> Channel<S> {
    /// Wrap an already connected stream
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Send one command
    ///
    /// Interrupted writes are retried.
    ///
    /// # Errors
    /// Returns error on an unrecoverable write failure
    pub fn send(&mut self, command: Command) -> Result<()> {
        trace!(%command, "send");
        self.stream.write_all(&command.encode()).map_err(|e| {
            warn!(%command, error = %e, "send failed");
            Error::Io(e)
        })
    }

    /// Receive one command
    ///
    /// A read failure (including the peer going away) is reported as
    /// [`Command::Invalid`]; deciding what that means is up to the caller.
    pub fn receive(&mut self) -> Command {
        let mut raw = [0u8; Command::WIRE_SIZE];
        match self.stream.read_exact(&mut raw) {
            Ok(()) => {
                let command = Command::decode(&raw);
                trace!(%command, "receive");
                command
            }
            Err(e) => {
                warn!(error = %e, "receive failed");
                Command::Invalid
            }
        }
    }

    /// Receive one command and require it to be `expected`
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] when any other command arrives
    pub fn expect(&mut self, expected: Command) -> Result<()> {
        match self.receive() {
            received if received == expected => Ok(()),
            received => Err(Error::Protocol { expected, received }),
        }
    }

    /// Send the raw pid payload that follows a [`Command::PidReport`]
    ///
    /// # Errors
    /// Returns error on an unrecoverable write failure
    pub fn send_pid(&mut self, pid: ProcessId) -> Result<()> {
        self.stream.write_all(&pid.encode())?;
        Ok(())
    }

    /// Read the raw pid payload that follows a [`Command::PidReport`]
    ///
    /// # Errors
    /// Returns error if the payload cannot be read or is not a valid pid
    pub fn receive_pid(&mut self) -> Result<ProcessId> {
        let mut raw = [0u8; ProcessId::WIRE_SIZE];
        self.stream.read_exact(&mut raw)?;
        ProcessId::decode(&raw).ok_or_else(|| Error::Software {
            message: format!("invalid pid payload: {raw:?}"),
        })
    }

    /// Give back the underlying stream
    pub fn into_inner(self) -> S {
        self.stream
    }
}
