//! Error types for Isolate

use std::path::PathBuf;

use thiserror::Error;

use crate::channel::Command;

/// Process exit codes, following the BSD `sysexits.h` convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ExitCode {
    /// Successful termination
    Success = 0,
    /// Command line usage error
    Usage = 64,
    /// Caller identity could not be resolved
    NoUser = 67,
    /// Internal software error
    Software = 70,
    /// Operating system error (fork, unshare, mapping, ...)
    OsErr = 71,
    /// I/O error on the coordination channel
    IoErr = 74,
    /// Configuration error
    Config = 78,
}

impl ExitCode {
    /// Get the raw process exit status
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }
}

/// Isolate error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Bad command line arguments
    #[error("usage error: {message}")]
    Usage {
        /// Error message
        message: String,
    },

    /// Invalid configuration directive
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// Caller lookup or validation failed
    #[error("caller identity: {message}")]
    Identity {
        /// Error message
        message: String,
    },

    /// Unexpected message on the command channel
    #[error("unexpected message: {received} (expected {expected})")]
    Protocol {
        /// Message the receiving side was waiting for
        expected: Command,
        /// Message that actually arrived
        received: Command,
    },

    /// I/O error on the command channel
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// System call failure
    #[error("{operation}: {source}")]
    System {
        /// Operation that failed
        operation: String,
        /// Underlying errno
        #[source]
        source: nix::Error,
    },

    /// Write to a procfs control file failed
    #[error("{}: {source}", path.display())]
    ProcFs {
        /// Control file path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Internal invariant violated
    #[error("{message}")]
    Software {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Build a mapper that tags a `nix` error with the failing operation
    ///
    /// ```
    /// use isolate_core::Error;
    ///
    /// let err = Err::<(), _>(nix::Error::EPERM).map_err(Error::system("unshare")).unwrap_err();
    /// assert_eq!(err.to_string(), "unshare: EPERM: Operation not permitted");
    /// ```
    pub fn system(operation: impl Into<String>) -> impl FnOnce(nix::Error) -> Self {
        let operation = operation.into();
        move |source| Self::System { operation, source }
    }

    /// Shorthand for [`Error::InvalidConfig`]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Exit code a process terminating with this error reports
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Usage { .. } => ExitCode::Usage,
            Self::InvalidConfig { .. } => ExitCode::Config,
            Self::Identity { .. } => ExitCode::NoUser,
            Self::Protocol { .. } | Self::Io(_) => ExitCode::IoErr,
            Self::System { .. } | Self::ProcFs { .. } => ExitCode::OsErr,
            Self::Software { .. } => ExitCode::Software,
        }
    }
}

/// Result type alias for Isolate operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            Error::Usage {
                message: String::new(),
            },
            Error::config(""),
            Error::Identity {
                message: String::new(),
            },
            Error::Protocol {
                expected: Command::PidReport,
                received: Command::ExecGrant,
            },
            Error::System {
                operation: "fork".into(),
                source: nix::Error::EAGAIN,
            },
            Error::Software {
                message: String::new(),
            },
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code().code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_os_and_io_failures_share_codes() {
        let eperm = nix::Error::EPERM as i32;
        let procfs = Error::ProcFs {
            path: PathBuf::from("/proc/1/uid_map"),
            source: std::io::Error::from_raw_os_error(eperm),
        };
        assert_eq!(procfs.exit_code(), ExitCode::OsErr);
        assert!(procfs.to_string().starts_with("/proc/1/uid_map: "));

        let system = Err::<(), _>(nix::Error::EPERM)
            .map_err(Error::system("setresuid"))
            .unwrap_err();
        assert_eq!(system.exit_code(), ExitCode::OsErr);

        let io: Error = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert_eq!(io.exit_code(), ExitCode::IoErr);
        assert_eq!(Error::config("x").exit_code(), ExitCode::Config);
    }

    #[test]
    fn test_protocol_error_display() {
        let err = Error::Protocol {
            expected: Command::ForkRequest,
            received: Command::Invalid,
        };
        assert_eq!(
            err.to_string(),
            "unexpected message: invalid (expected fork-request)"
        );
    }
}
