//! Process execution in isolated namespaces
//!
//! This module uses `unsafe` for fork() which is inherently unsafe
//! but necessary for proper PID namespace isolation.
//!
//! Three process roles cooperate over one command channel:
//!
//! ```text
//! launcher ── fork ──> builder
//!   | fork-request ──────> unshare(namespaces)
//!   |                      fork ──> command process (pid 1 of the new pidns)
//!   | <── pid-report + pid        |
//!   | reap builder                | (builder exits)
//!   | write uid/gid maps          |
//!   | exec-grant ────────────────>| pdeathsig, chroot, fd hygiene,
//!   |                             | rlimits, setresgid/setresuid, exec
//!   | wait() until the command process exits
//! ```
//!
//! The launcher is a child subreaper, so anything orphaned inside the new
//! namespace is reparented to it and reaped. The command process dies with
//! the launcher through its parent-death signal.

#![allow(unsafe_code)]

use std::convert::Infallible;
use std::ffi::CString;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;

use isolate_core::{Channel, Command, Error, ProcessId, Result};
use isolate_security::mark_close_on_exec_all;
use nix::errno::Errno;
use nix::sys::prctl;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::wait::{WaitStatus, wait, waitpid};
use nix::unistd::{ForkResult, Gid, Uid, chdir, chroot, execvp, execvpe, fork, setresgid, setresuid};
use tracing::{debug, error, info, trace};

use crate::config::IsolationConfig;
use crate::idmap::IdMapping;
use crate::manager::NamespaceManager;

/// Launcher-side operating system effects
///
/// Split out so the handshake can be driven against a fake in tests, the way
/// resource backends are elsewhere.
pub trait LauncherBackend {
    /// Adopt orphaned descendants
    fn become_subreaper(&mut self) -> Result<()>;

    /// Wait for the builder and return its exit status
    fn reap_builder(&mut self, builder: ProcessId) -> Result<i32>;

    /// Write identity mappings for the parked command process
    fn install_mappings(
        &mut self,
        target: ProcessId,
        uid_map: &IdMapping,
        gid_map: &IdMapping,
    ) -> Result<()>;

    /// Reap descendants until `target` exits and return its exit status
    fn wait_target(&mut self, target: ProcessId) -> Result<i32>;
}

/// Backend operating on the real process tree
#[derive(Debug)]
pub struct HostBackend {
    manager: NamespaceManager,
}

impl HostBackend {
    /// Create a backend writing mappings through `manager`
    #[must_use]
    pub const fn new(manager: NamespaceManager) -> Self {
        Self { manager }
    }
}

impl LauncherBackend for HostBackend {
    fn become_subreaper(&mut self) -> Result<()> {
        prctl::set_child_subreaper(true).map_err(Error::system("prctl(PR_SET_CHILD_SUBREAPER)"))
    }

    fn reap_builder(&mut self, builder: ProcessId) -> Result<i32> {
        loop {
            match waitpid(builder.as_nix_pid(), None) {
                Ok(status) => {
                    if let Some(code) = exit_code(status) {
                        return Ok(code);
                    }
                }
                Err(Errno::EINTR) => {}
                Err(e) => return Err(Error::system("waitpid")(e)),
            }
        }
    }

    fn install_mappings(
        &mut self,
        target: ProcessId,
        uid_map: &IdMapping,
        gid_map: &IdMapping,
    ) -> Result<()> {
        self.manager.install_mappings(target, uid_map, gid_map)
    }

    fn wait_target(&mut self, target: ProcessId) -> Result<i32> {
        loop {
            match wait() {
                Ok(status) => match (status.pid(), exit_code(status)) {
                    (Some(pid), Some(code)) if pid == target.as_nix_pid() => return Ok(code),
                    (pid, _) => trace!(?pid, ?status, "reaped descendant"),
                },
                Err(Errno::EINTR) => {}
                Err(e) => return Err(Error::system("wait")(e)),
            }
        }
    }
}

/// Exit status of a terminated process, `128 + signo` when killed by a signal
#[must_use]
pub const fn exit_code(status: WaitStatus) -> Option<i32> {
    match status {
        WaitStatus::Exited(_, code) => Some(code),
        WaitStatus::Signaled(_, signal, _) => Some(128 + signal as i32),
        _ => None,
    }
}

/// The privileged outer process
///
/// Drives the builder through namespace creation, maps identities for the
/// command process and supervises it to the end.
#[derive(Debug)]
pub struct Launcher<'a, S, B> {
    config: &'a IsolationConfig,
    channel: Channel<S>,
    builder: ProcessId,
    backend: B,
}

impl<'a, S: Read + Write, B: LauncherBackend> Launcher<'a, S, B> {
    /// Create the launcher for an already forked builder
    pub const fn new(
        config: &'a IsolationConfig,
        channel: Channel<S>,
        builder: ProcessId,
        backend: B,
    ) -> Self {
        Self {
            config,
            channel,
            builder,
            backend,
        }
    }

    /// Run the handshake and return the command's exit status
    ///
    /// A builder that fails is not second-guessed: its exit status becomes
    /// the result and the command process is never granted exec.
    pub fn run(mut self) -> Result<i32> {
        self.backend.become_subreaper()?;
        self.channel.send(Command::ForkRequest)?;

        // Only a closed channel means the builder is exiting; a live builder
        // sending the wrong message is never waited for.
        match self.channel.receive() {
            Command::PidReport => {}
            Command::Invalid => {
                let status = self.backend.reap_builder(self.builder)?;
                if status != 0 {
                    debug!(builder = %self.builder, status, "builder failed");
                    return Ok(status);
                }
                return Err(Error::Protocol {
                    expected: Command::PidReport,
                    received: Command::Invalid,
                });
            }
            received => {
                return Err(Error::Protocol {
                    expected: Command::PidReport,
                    received,
                });
            }
        }

        let target = self.channel.receive_pid()?;
        debug!(pid = %target, "container created");

        let status = self.backend.reap_builder(self.builder)?;
        if status != 0 {
            debug!(builder = %self.builder, status, "builder failed");
            return Ok(status);
        }

        if self.config.maps_identities() {
            self.backend
                .install_mappings(target, self.config.uid_map(), self.config.gid_map())?;
        }

        self.channel.send(Command::ExecGrant)?;

        let status = self.backend.wait_target(target)?;
        debug!(pid = %target, status, "container finished");
        Ok(status)
    }
}

/// Run `config`'s command in fresh namespaces and return its exit status
///
/// Only the launcher returns from this function; the builder and the
/// command process exit or exec on their own.
pub fn execute(config: &IsolationConfig) -> Result<i32> {
    info!(
        command = %config.command().join(" "),
        namespaces = %config.namespaces(),
        "isolating command"
    );

    let (launcher_end, builder_end) = Channel::pair()?;

    match unsafe { fork() }.map_err(Error::system("fork"))? {
        ForkResult::Parent { child } => {
            drop(builder_end);
            let backend = HostBackend::new(NamespaceManager::new(config.namespaces()));
            Launcher::new(config, launcher_end, child.into(), backend).run()
        }
        ForkResult::Child => {
            drop(launcher_end);
            terminate(run_builder(config, builder_end))
        }
    }
}

/// Builder role: detach namespaces, fork the command process, report it
fn run_builder(config: &IsolationConfig, mut channel: Channel<UnixStream>) -> Result<()> {
    channel.expect(Command::ForkRequest)?;

    NamespaceManager::new(config.namespaces()).detach()?;

    match unsafe { fork() }.map_err(Error::system("fork(second)"))? {
        ForkResult::Parent { child } => {
            channel.send(Command::PidReport)?;
            channel.send_pid(child.into())?;
            Ok(())
        }
        ForkResult::Child => terminate(run_command(config, channel).map(|never| match never {})),
    }
}

/// Command process role: wait for the grant, lock down, exec
fn run_command(config: &IsolationConfig, mut channel: Channel<UnixStream>) -> Result<Infallible> {
    channel.expect(Command::ExecGrant)?;

    prctl::set_pdeathsig(Signal::SIGKILL).map_err(Error::system("prctl(PR_SET_PDEATHSIG)"))?;

    // The Rust runtime ignores SIGPIPE and that disposition survives exec.
    // SAFETY: restoring the default disposition installs no handler code.
    unsafe { signal(Signal::SIGPIPE, SigHandler::SigDfl) }
        .map_err(Error::system("signal(SIGPIPE)"))?;

    if let Some(root) = config.root() {
        chroot(root).map_err(Error::system(format!("chroot: {}", root.display())))?;
        chdir("/").map_err(Error::system("chdir: /"))?;
    }

    mark_close_on_exec_all()?;
    config.rlimits().apply()?;

    if let Some(gid) = config.gid() {
        let gid = Gid::from_raw(gid);
        setresgid(gid, gid, gid).map_err(Error::system("setresgid"))?;
    }
    if let Some(uid) = config.uid() {
        let uid = Uid::from_raw(uid);
        setresuid(uid, uid, uid).map_err(Error::system("setresuid"))?;
    }

    let argv = to_cstrings(config.command().iter().map(String::as_str))?;
    debug!(program = ?argv[0], "exec");

    let result = match config.environment() {
        Some(environment) => {
            let envp = to_cstrings(environment.iter().map(|(name, value)| format!("{name}={value}")))?;
            execvpe(&argv[0], &argv, &envp)
        }
        None => execvp(&argv[0], &argv),
    };

    let Err(e) = result;
    Err(Error::Software {
        message: format!("execvp: {}: {e}", config.command()[0]),
    })
}

fn to_cstrings<I, T>(items: I) -> Result<Vec<CString>>
where
    I: IntoIterator<Item = T>,
    T: Into<Vec<u8>>,
{
    items
        .into_iter()
        .map(|item| {
            CString::new(item).map_err(|e| Error::Software {
                message: format!("argument with NUL byte: {e}"),
            })
        })
        .collect()
}

/// Leave a forked role with the exit code matching its outcome
fn terminate(result: Result<()>) -> ! {
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!(pid = %ProcessId::current(), "{e}");
            std::process::exit(e.exit_code().code())
        }
    }
}
