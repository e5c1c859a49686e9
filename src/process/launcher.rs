//! # Launching the OS child with inherited descriptors.
//!
//! The child process contract, by fixed convention:
//!
//! - fd 3 — the shared bind socket (duplicated, never transferred)
//! - fd 4 — the write end of the private notify channel
//! - `LISTEN_FDS=1` / `NOTIFY_FD=4` environment markers
//! - stdin from /dev/null, stdout/stderr forwarded through the
//!   supervisor's log sink
//!
//! Descriptor wiring happens in a `pre_exec` hook between fork and
//! exec. Both source descriptors are first staged above the target
//! range, so wiring one target can never clobber the other source, and
//! the `F_DUPFD` duplicates carry no close-on-exec flag.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::Stdio;

use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::config::ProcessConfig;
use crate::error::RuntimeError;
use crate::supervisor::InstanceId;

use super::state::ExitStatus;
use super::{log, notifier};

/// Target descriptor for the inherited bind socket.
pub(crate) const BIND_FD: RawFd = 3;
/// Target descriptor for the notify channel write end.
pub(crate) const NOTIFY_FD: RawFd = 4;

/// A successfully spawned child: its pid plus the two event streams the
/// supervisor selects over.
#[derive(Debug)]
pub(crate) struct Launched {
    pub pid: i32,
    /// One event per `READY=1` line on the notify channel; ends when
    /// the channel closes.
    pub ready_rx: mpsc::UnboundedReceiver<()>,
    /// Exactly one exit notification.
    pub exit_rx: oneshot::Receiver<ExitStatus>,
}

/// Spawns the worker described by `config`, inheriting `bind` as fd 3.
///
/// Consumes the caller's duplicate of the bind socket; both per-child
/// descriptors are released here once the child holds its own copies.
/// A spawn refusal surfaces as [`RuntimeError::Launch`], never a panic.
pub(crate) fn launch(
    id: InstanceId,
    config: &ProcessConfig,
    bind: OwnedFd,
) -> Result<Launched, RuntimeError> {
    let program = config.command.first().ok_or_else(|| RuntimeError::Launch {
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    })?;

    let (notify_parent, notify_child) =
        socketpair(AddressFamily::Unix, SockType::Stream, None, SockFlag::SOCK_CLOEXEC)
            .map_err(|e| RuntimeError::NotifyChannel {
                source: std::io::Error::from_raw_os_error(e as i32),
            })?;

    // Wire the reader before spawning: if the spawn fails the child end
    // is dropped below and the reader exits on EOF.
    let (ready_tx, ready_rx) = mpsc::unbounded_channel();
    notifier::spawn(id, notify_parent, ready_tx)
        .map_err(|e| RuntimeError::NotifyChannel { source: e })?;

    let mut command = Command::new(program);
    command
        .args(&config.command[1..])
        .env("LISTEN_FDS", "1")
        .env("NOTIFY_FD", NOTIFY_FD.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    if let Some(cwd) = &config.cwd {
        command.current_dir(cwd);
    }

    let bind_raw = bind.as_raw_fd();
    let notify_raw = notify_child.as_raw_fd();
    unsafe {
        command.pre_exec(move || wire_descriptors(bind_raw, notify_raw));
    }

    let mut child = command
        .spawn()
        .map_err(|e| RuntimeError::Launch { source: e })?;

    // The child owns its copies now; release ours.
    drop(notify_child);
    drop(bind);

    let pid = child.id().map(|p| p as i32).unwrap_or(-1);

    if let Some(stdout) = child.stdout.take() {
        log::forward(id, "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        log::forward(id, "stderr", stderr);
    }

    let (exit_tx, exit_rx) = oneshot::channel();
    tokio::spawn(async move {
        let status = ExitStatus::from_wait(child.wait().await);
        let _ = exit_tx.send(status);
    });

    Ok(Launched {
        pid,
        ready_rx,
        exit_rx,
    })
}

/// Runs between fork and exec; restricted to async-signal-safe calls.
fn wire_descriptors(bind: RawFd, notify: RawFd) -> std::io::Result<()> {
    let bind_tmp = dup_above(bind, NOTIFY_FD + 1)?;
    let notify_tmp = dup_above(notify, NOTIFY_FD + 1)?;
    unsafe {
        if libc::dup2(bind_tmp, BIND_FD) < 0 {
            return Err(std::io::Error::last_os_error());
        }
        if libc::dup2(notify_tmp, NOTIFY_FD) < 0 {
            return Err(std::io::Error::last_os_error());
        }
        libc::close(bind_tmp);
        libc::close(notify_tmp);
    }
    Ok(())
}

/// Duplicates `fd` to the lowest free descriptor at or above `min`.
/// The duplicate carries no close-on-exec flag, so it survives exec.
fn dup_above(fd: RawFd, min: RawFd) -> std::io::Result<RawFd> {
    let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD, min) };
    if dup < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(dup)
}
