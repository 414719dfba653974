//! Descriptor hygiene
//!
//! Nothing but stdin, stdout and stderr may survive into the isolated
//! program.

#![allow(unsafe_code)]

use std::os::fd::RawFd;

use isolate_core::{Error, Result};
use nix::errno::Errno;
use nix::unistd::{SysconfVar, sysconf};
use tracing::trace;

/// Kernel ceiling for open descriptors (`NR_OPEN` in `linux/limits.h`)
const NR_OPEN: libc::c_long = 1024 * 1024;

/// Highest descriptor number (exclusive) worth checking
fn open_max() -> RawFd {
    let limit = sysconf(SysconfVar::OPEN_MAX).ok().flatten().unwrap_or(0);
    RawFd::try_from(limit.max(NR_OPEN)).unwrap_or(RawFd::MAX)
}

/// Set close-on-exec on every open descriptor above stderr
///
/// Descriptors that are not open are skipped. Returns how many descriptors
/// had to be changed.
///
/// # Errors
/// Returns error if the flag cannot be set on an open descriptor
pub fn mark_close_on_exec_all() -> Result<usize> {
    let mut marked = 0;

    for fd in (libc::STDERR_FILENO + 1)..open_max() {
        // SAFETY: F_GETFD only inspects the descriptor table entry.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if flags < 0 {
            continue;
        }

        let new_flags = flags | libc::FD_CLOEXEC;
        if new_flags == flags {
            continue;
        }

        // SAFETY: only the descriptor flags are changed, ownership is untouched.
        if unsafe { libc::fcntl(fd, libc::F_SETFD, new_flags) } < 0 {
            return Err(Error::System {
                operation: format!("fcntl(F_SETFD) on fd {fd}"),
                source: Errno::last(),
            });
        }

        trace!(fd, "marked close-on-exec");
        marked += 1;
    }

    Ok(marked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::fd::AsRawFd;

    fn cloexec(fd: RawFd) -> bool {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert!(flags >= 0);
        flags & libc::FD_CLOEXEC != 0
    }

    #[test]
    fn test_open_max_covers_nr_open() {
        assert!(open_max() >= 1024 * 1024);
    }

    #[test]
    fn test_inherited_descriptor_is_marked() {
        let file = File::open("/dev/null").unwrap();
        let dup = unsafe { libc::dup(file.as_raw_fd()) };
        assert!(dup > libc::STDERR_FILENO);
        assert!(!cloexec(dup));

        mark_close_on_exec_all().unwrap();

        assert!(cloexec(dup));
        unsafe { libc::close(dup) };
    }

    #[test]
    fn test_standard_streams_untouched() {
        let before: Vec<_> = (0..=libc::STDERR_FILENO)
            .map(|fd| unsafe { libc::fcntl(fd, libc::F_GETFD) })
            .collect();

        mark_close_on_exec_all().unwrap();

        let after: Vec<_> = (0..=libc::STDERR_FILENO)
            .map(|fd| unsafe { libc::fcntl(fd, libc::F_GETFD) })
            .collect();
        assert_eq!(before, after);
    }
}
