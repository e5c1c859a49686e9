//! # Supervisor: the per-instance lifecycle actor.
//!
//! One [`Supervisor`] owns exactly one worker generation: it launches
//! the OS child, then runs a single reactive loop consuming whichever
//! of {readiness, exit, directive} arrives next, applies the pure
//! transition table, performs the prescribed signal effect, and reports
//! every state change to the manager.
//!
//! ## High-level architecture
//! ```text
//!                       launch (fd 3 = bind socket, fd 4 = notify)
//!                          │
//!  ┌───────────────────────▼───────────────────────┐
//!  │ Supervisor loop (one per instance)            │
//!  │   select:                                     │
//!  │     readiness (notify channel) ─┐             │
//!  │     exit (child reaped) ────────┼─► apply ──► │──► StateChange ──► Manager
//!  │     directive (from manager) ───┘   effect    │      (FIFO per instance)
//!  │                                 SIGTERM/KILL  │
//!  └───────────────────────────────────────────────┘
//! ```
//!
//! Directives are the only way anything outside influences the
//! instance; no supervisor ever inspects another's state. Once the
//! state machine reaches STOPPED or FAILED the loop ends and every
//! per-instance descriptor (bind duplicate, notify channel, log pipes)
//! is released.

use std::fmt;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::process::{self, Effect, ExitStatus, Launched, ProcessEvent, ProcessState};

/// Sequential identity of a supervised instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Control messages accepted by a supervisor.
#[derive(Debug, Clone, Copy)]
pub enum Directive {
    /// Request a graceful stop (drives the FSM to STOPPING).
    Shutdown,
    /// Force-kill; marks the eventual exit as a failure.
    Kill,
    /// Deliver an arbitrary signal without touching the FSM.
    Signal(Signal),
}

/// State-change notification delivered to the manager.
///
/// Notifications from one supervisor arrive in emission order; no
/// ordering holds across instances.
#[derive(Debug)]
pub struct StateChange {
    pub id: InstanceId,
    pub state: ProcessState,
    pub pid: Option<i32>,
    /// Captured termination status, present exactly once on the
    /// terminal notification.
    pub exit: Option<ExitStatus>,
}

/// Cheap cloneable handle for sending directives to a supervisor.
///
/// Sends are fire-and-forget; a directive to an already-finished
/// instance is silently dropped.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<Directive>,
}

impl SupervisorHandle {
    /// Requests a graceful stop.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Directive::Shutdown);
    }

    /// Escalates to a forceful kill.
    pub fn kill(&self) {
        let _ = self.tx.send(Directive::Kill);
    }

    /// Delivers `sig` to the child out of band.
    pub fn signal(&self, sig: Signal) {
        let _ = self.tx.send(Directive::Signal(sig));
    }

    /// Handle whose supervisor is already gone, for set tests.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Owns one worker generation for its whole lifecycle.
pub struct Supervisor {
    id: InstanceId,
    config: Arc<ProcessConfig>,
    notes: mpsc::UnboundedSender<StateChange>,
}

impl Supervisor {
    /// Spawns the supervisor actor for a new instance.
    ///
    /// `bind` is this instance's duplicate of the shared listening
    /// socket; it is consumed by the launch and released once the child
    /// holds its own copy. State changes are reported on `notes`.
    pub fn spawn(
        id: InstanceId,
        config: Arc<ProcessConfig>,
        bind: OwnedFd,
        notes: mpsc::UnboundedSender<StateChange>,
    ) -> SupervisorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Supervisor { id, config, notes };
        tokio::spawn(supervisor.run(bind, rx));
        SupervisorHandle { tx }
    }

    async fn run(self, bind: OwnedFd, mut directives: mpsc::UnboundedReceiver<Directive>) {
        let mut state = ProcessState::New;

        let launched = match process::launch(self.id, &self.config, bind) {
            Ok(launched) => launched,
            Err(e) => {
                warn!(id = %self.id, error = %e, "launch failed");
                let exit = ExitStatus {
                    code: -1,
                    signal: None,
                    error: Some(e.to_string()),
                };
                self.step(&mut state, ProcessEvent::LaunchFailed, None, Some(exit));
                return;
            }
        };
        let Launched {
            pid,
            mut ready_rx,
            exit_rx,
        } = launched;

        self.step(&mut state, ProcessEvent::LaunchSucceeded, Some(pid), None);

        let mut forced = false;
        let mut ready_open = true;
        let mut directives_open = true;
        tokio::pin!(exit_rx);

        while !state.is_terminal() {
            tokio::select! {
                res = &mut exit_rx => {
                    let status = res.unwrap_or_else(|_| ExitStatus {
                        code: -1,
                        signal: None,
                        error: Some("exit watcher dropped".into()),
                    });
                    let event = ProcessEvent::Exited { clean: status.clean(), forced };
                    self.step(&mut state, event, Some(pid), Some(status));
                }
                maybe = ready_rx.recv(), if ready_open => match maybe {
                    Some(()) => {
                        if state == ProcessState::Ready {
                            info!(id = %self.id, pid, "worker signalled ready twice, ignoring");
                        }
                        self.step(&mut state, ProcessEvent::Ready, Some(pid), None);
                    }
                    None => ready_open = false,
                },
                maybe = directives.recv(), if directives_open => match maybe {
                    Some(Directive::Shutdown) => {
                        self.step(&mut state, ProcessEvent::ShutdownRequested, Some(pid), None);
                    }
                    Some(Directive::Kill) => {
                        forced = true;
                        self.step(&mut state, ProcessEvent::KillRequested, Some(pid), None);
                    }
                    Some(Directive::Signal(sig)) => self.deliver(pid, sig),
                    // Manager gone; keep waiting for the child to exit.
                    None => directives_open = false,
                },
            }
        }

        debug!(id = %self.id, "supervisor finished");
    }

    /// Applies one event: transition, effect, and (on change) the
    /// manager notification.
    fn step(
        &self,
        state: &mut ProcessState,
        event: ProcessEvent,
        pid: Option<i32>,
        exit: Option<ExitStatus>,
    ) {
        let transition = state.apply(event);

        match transition.effect {
            Effect::None => {}
            Effect::SendTerm => self.deliver(pid.unwrap_or(-1), Signal::SIGTERM),
            Effect::SendKill => self.deliver(pid.unwrap_or(-1), Signal::SIGKILL),
        }

        if transition.next != *state {
            debug!(id = %self.id, from = %state, to = %transition.next, "state changed");
            let _ = self.notes.send(StateChange {
                id: self.id,
                state: transition.next,
                pid,
                exit,
            });
            *state = transition.next;
        }
    }

    fn deliver(&self, pid: i32, sig: Signal) {
        if pid <= 0 {
            return;
        }
        info!(id = %self.id, pid, signal = %sig, "sending signal");
        if let Err(e) = kill(Pid::from_raw(pid), sig) {
            warn!(id = %self.id, pid, signal = %sig, error = %e, "signal delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throwaway_bind() -> OwnedFd {
        OwnedFd::from(std::net::TcpListener::bind("127.0.0.1:0").unwrap())
    }

    fn config(script: &str) -> Arc<ProcessConfig> {
        Arc::new(ProcessConfig {
            command: vec!["/bin/sh".into(), "-c".into(), script.into()],
            ..ProcessConfig::default()
        })
    }

    async fn next_state(rx: &mut mpsc::UnboundedReceiver<StateChange>) -> StateChange {
        tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a state change")
            .expect("notification channel closed")
    }

    #[tokio::test]
    async fn test_clean_exit_before_ready_is_stopped() {
        let (notes, mut rx) = mpsc::unbounded_channel();
        Supervisor::spawn(InstanceId(1), config("exit 0"), throwaway_bind(), notes);

        assert_eq!(next_state(&mut rx).await.state, ProcessState::Starting);
        let terminal = next_state(&mut rx).await;
        assert_eq!(terminal.state, ProcessState::Stopped);
        assert_eq!(terminal.exit.unwrap().code, 0);
    }

    #[tokio::test]
    async fn test_crash_before_ready_is_failed() {
        let (notes, mut rx) = mpsc::unbounded_channel();
        Supervisor::spawn(InstanceId(1), config("exit 3"), throwaway_bind(), notes);

        assert_eq!(next_state(&mut rx).await.state, ProcessState::Starting);
        let terminal = next_state(&mut rx).await;
        assert_eq!(terminal.state, ProcessState::Failed);
        assert_eq!(terminal.exit.unwrap().code, 3);
    }

    #[tokio::test]
    async fn test_ready_then_exit_is_failed() {
        let (notes, mut rx) = mpsc::unbounded_channel();
        Supervisor::spawn(
            InstanceId(1),
            // The pause keeps readiness strictly before the exit.
            config("echo READY=1 >&4; sleep 0.3; exit 0"),
            throwaway_bind(),
            notes,
        );

        assert_eq!(next_state(&mut rx).await.state, ProcessState::Starting);
        assert_eq!(next_state(&mut rx).await.state, ProcessState::Ready);
        // Even a clean exit of the serving generation is a failure.
        assert_eq!(next_state(&mut rx).await.state, ProcessState::Failed);
    }

    #[tokio::test]
    async fn test_graceful_shutdown_path() {
        let (notes, mut rx) = mpsc::unbounded_channel();
        let handle = Supervisor::spawn(
            InstanceId(1),
            config("trap 'exit 0' TERM; echo READY=1 >&4; while :; do sleep 0.05; done"),
            throwaway_bind(),
            notes,
        );

        assert_eq!(next_state(&mut rx).await.state, ProcessState::Starting);
        assert_eq!(next_state(&mut rx).await.state, ProcessState::Ready);

        handle.shutdown();
        assert_eq!(next_state(&mut rx).await.state, ProcessState::Stopping);
        let terminal = next_state(&mut rx).await;
        assert_eq!(terminal.state, ProcessState::Stopped);
    }

    #[tokio::test]
    async fn test_forced_kill_marks_failure() {
        let (notes, mut rx) = mpsc::unbounded_channel();
        let handle = Supervisor::spawn(
            InstanceId(1),
            config("echo READY=1 >&4; sleep 60"),
            throwaway_bind(),
            notes,
        );

        assert_eq!(next_state(&mut rx).await.state, ProcessState::Starting);
        assert_eq!(next_state(&mut rx).await.state, ProcessState::Ready);

        handle.kill();
        let terminal = next_state(&mut rx).await;
        assert_eq!(terminal.state, ProcessState::Failed);
        assert_eq!(terminal.exit.unwrap().signal, Some(libc::SIGKILL));
    }

    #[tokio::test]
    async fn test_launch_failure_goes_straight_to_failed() {
        let (notes, mut rx) = mpsc::unbounded_channel();
        Supervisor::spawn(
            InstanceId(1),
            Arc::new(ProcessConfig {
                command: vec!["/no/such/binary".into()],
                ..ProcessConfig::default()
            }),
            throwaway_bind(),
            notes,
        );

        let terminal = next_state(&mut rx).await;
        assert_eq!(terminal.state, ProcessState::Failed);
        assert!(terminal.exit.unwrap().error.is_some());
        assert!(rx.recv().await.is_none(), "no further notifications");
    }
}
