//! # Readiness notifier: the private channel between worker and supervisor.
//!
//! Each launched worker inherits the write end of a socketpair as fd 4
//! and reports application-level events by writing single-line commands
//! to it. The notifier owns the read end and currently recognizes one
//! command, `READY=1`, which it turns into a readiness event — once per
//! occurrence.
//!
//! Unrecognized commands are logged and otherwise ignored. When the
//! channel closes (the worker exited or closed its end) the notifier
//! ends silently: channel EOF is not an error signal, the exit itself
//! is observed independently by the launcher's exit watcher.

use std::os::fd::OwnedFd;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::supervisor::InstanceId;

/// The one command the notify protocol recognizes.
pub(crate) const READY_COMMAND: &str = "READY=1";

/// Takes ownership of the parent end of the notify channel and spawns
/// the reader task. Readiness events are delivered on `ready_tx`.
pub(crate) fn spawn(
    id: InstanceId,
    fd: OwnedFd,
    ready_tx: mpsc::UnboundedSender<()>,
) -> std::io::Result<()> {
    let stream = std::os::unix::net::UnixStream::from(fd);
    stream.set_nonblocking(true)?;
    let stream = UnixStream::from_std(stream)?;

    tokio::spawn(run(id, stream, ready_tx));
    Ok(())
}

async fn run(id: InstanceId, stream: UnixStream, ready_tx: mpsc::UnboundedSender<()>) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match line.trim() {
                READY_COMMAND => {
                    if ready_tx.send(()).is_err() {
                        return;
                    }
                }
                "" => {}
                command => {
                    warn!(%id, command, "unknown command on notify channel");
                }
            },
            // EOF: the worker closed its end, nothing more will arrive.
            Ok(None) => return,
            Err(e) => {
                debug!(%id, error = %e, "notify channel read failed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::OwnedFd;

    use super::*;

    fn pair() -> (OwnedFd, std::os::unix::net::UnixStream) {
        let (parent, child) = std::os::unix::net::UnixStream::pair().unwrap();
        (OwnedFd::from(parent), child)
    }

    #[tokio::test]
    async fn test_ready_command_emits_one_event() {
        let (parent, mut child) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn(InstanceId(1), parent, tx).unwrap();

        child.write_all(b"READY=1\n").unwrap();
        assert_eq!(rx.recv().await, Some(()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_each_ready_line_emits_an_event() {
        let (parent, mut child) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn(InstanceId(1), parent, tx).unwrap();

        child.write_all(b"READY=1\nREADY=1\n").unwrap();
        assert_eq!(rx.recv().await, Some(()));
        assert_eq!(rx.recv().await, Some(()));
    }

    #[tokio::test]
    async fn test_unknown_commands_are_ignored() {
        let (parent, mut child) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn(InstanceId(1), parent, tx).unwrap();

        child.write_all(b"HEARTBEAT=1\nREADY=1\n").unwrap();
        // Only the READY line produces an event.
        assert_eq!(rx.recv().await, Some(()));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_channel_close_ends_stream_silently() {
        let (parent, child) = pair();
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawn(InstanceId(1), parent, tx).unwrap();

        drop(child);
        // The sender side is dropped by the exiting task, which closes
        // the channel without ever emitting an event.
        assert_eq!(rx.recv().await, None);
    }
}
