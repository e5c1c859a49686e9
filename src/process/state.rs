//! # Process lifecycle states and the transition table.
//!
//! The lifecycle of a supervised worker is an explicit finite state
//! machine:
//!
//! ```text
//!  NEW ──► STARTING ──► READY ──► STOPPING ──► STOPPED
//!   │         │           │          │
//!   │         │           │          └────────► FAILED   (forced kill)
//!   │         └───────────┴───────────────────► FAILED   (crash / timeout)
//!   └─────────────────────────────────────────► FAILED   (launch error)
//! ```
//!
//! [`ProcessState::apply`] is a pure function over `(state, event)`
//! returning the next state plus the side effect the caller must
//! perform. Keeping the table pure makes it exhaustively testable and
//! keeps signal-sending out of the state logic: the supervisor actor
//! performs effects, the table only prescribes them.
//!
//! Terminal states absorb every event with no effect; the actor logs
//! those occurrences as anomalies.

use std::fmt;

/// Lifecycle state of one supervised instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    /// Created, child not spawned yet.
    New,
    /// Child spawned, readiness signal not yet received.
    Starting,
    /// Worker signalled readiness; this is the serving generation.
    Ready,
    /// Graceful terminate sent, waiting for the child to exit.
    Stopping,
    /// Exited cleanly. Terminal.
    Stopped,
    /// Launch error, crash, or timeout escalation. Terminal.
    Failed,
}

/// Event consumed by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent {
    /// The OS child was spawned.
    LaunchSucceeded,
    /// The OS refused to spawn the child.
    LaunchFailed,
    /// The worker wrote `READY=1` on the notify channel.
    Ready,
    /// The child terminated.
    ///
    /// `clean` is true for exit code zero; `forced` is true when a
    /// forceful kill had been issued for this instance (timeout
    /// escalation), which marks the exit as a failure even in STOPPING.
    Exited { clean: bool, forced: bool },
    /// Graceful terminate requested.
    ShutdownRequested,
    /// Forceful kill requested (timeout escalation).
    KillRequested,
}

/// Side effect the caller must perform alongside a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing to do.
    None,
    /// Send the graceful-terminate signal (SIGTERM).
    SendTerm,
    /// Send the forceful kill signal (SIGKILL).
    SendKill,
}

/// Result of applying an event to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ProcessState,
    pub effect: Effect,
}

impl ProcessState {
    /// Applies `event`, returning the next state and required effect.
    ///
    /// Every `(state, event)` pair is defined; combinations outside the
    /// lifecycle contract keep the current state with no effect.
    pub fn apply(self, event: ProcessEvent) -> Transition {
        use Effect as F;
        use ProcessEvent as E;
        use ProcessState as S;

        let (next, effect) = match (self, event) {
            (S::New, E::LaunchSucceeded) => (S::Starting, F::None),
            (S::New, E::LaunchFailed) => (S::Failed, F::None),

            (S::Starting, E::Ready) => (S::Ready, F::None),
            (S::Starting, E::Exited { clean, forced }) => {
                if clean && !forced {
                    (S::Stopped, F::None)
                } else {
                    (S::Failed, F::None)
                }
            }
            (S::Starting, E::ShutdownRequested) => (S::Stopping, F::SendTerm),
            (S::Starting, E::KillRequested) => (S::Starting, F::SendKill),

            // A duplicate readiness signal is an anomaly, not an error.
            (S::Ready, E::Ready) => (S::Ready, F::None),
            (S::Ready, E::Exited { .. }) => (S::Failed, F::None),
            (S::Ready, E::ShutdownRequested) => (S::Stopping, F::SendTerm),
            (S::Ready, E::KillRequested) => (S::Ready, F::SendKill),

            (S::Stopping, E::Exited { forced, .. }) => {
                if forced {
                    (S::Failed, F::None)
                } else {
                    // A TERM'd worker may exit non-zero; that still
                    // counts as a completed stop.
                    (S::Stopped, F::None)
                }
            }
            // Repeated shutdown is idempotent: one SIGTERM total.
            (S::Stopping, E::ShutdownRequested) => (S::Stopping, F::None),
            (S::Stopping, E::KillRequested) => (S::Stopping, F::SendKill),

            // Everything else keeps the state unchanged.
            (state, _) => (state, F::None),
        };

        Transition { next, effect }
    }

    /// True for STOPPED and FAILED.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Stopped | ProcessState::Failed)
    }

    /// Stable lowercase name, used by the control surface.
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::New => "new",
            ProcessState::Starting => "starting",
            ProcessState::Ready => "ready",
            ProcessState::Stopping => "stopping",
            ProcessState::Stopped => "stopped",
            ProcessState::Failed => "failed",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Captured termination status of a child, set exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code; -1 when the child was killed by a signal or the exit
    /// could not be observed.
    pub code: i32,
    /// Terminating signal, when the child died from one.
    pub signal: Option<i32>,
    /// Launch or wait error, when the failure happened on our side.
    pub error: Option<String>,
}

impl ExitStatus {
    /// Converts the result of waiting on the child.
    pub fn from_wait(res: std::io::Result<std::process::ExitStatus>) -> Self {
        use std::os::unix::process::ExitStatusExt;

        match res {
            Ok(status) => Self {
                code: status.code().unwrap_or(-1),
                signal: status.signal(),
                error: None,
            },
            Err(e) => Self {
                code: -1,
                signal: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// True only for a plain zero exit code.
    pub fn clean(&self) -> bool {
        self.code == 0 && self.error.is_none()
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, self.signal) {
            (Some(err), _) => write!(f, "error: {err}"),
            (None, Some(sig)) => write!(f, "signal {sig}"),
            (None, None) => write!(f, "code {}", self.code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn next(state: ProcessState, event: ProcessEvent) -> ProcessState {
        state.apply(event).next
    }

    fn effect(state: ProcessState, event: ProcessEvent) -> Effect {
        state.apply(event).effect
    }

    const EXIT_CLEAN: ProcessEvent = ProcessEvent::Exited {
        clean: true,
        forced: false,
    };
    const EXIT_CRASH: ProcessEvent = ProcessEvent::Exited {
        clean: false,
        forced: false,
    };
    const EXIT_KILLED: ProcessEvent = ProcessEvent::Exited {
        clean: false,
        forced: true,
    };

    #[test]
    fn test_launch_outcomes() {
        assert_eq!(
            next(ProcessState::New, ProcessEvent::LaunchSucceeded),
            ProcessState::Starting
        );
        assert_eq!(
            next(ProcessState::New, ProcessEvent::LaunchFailed),
            ProcessState::Failed
        );
    }

    #[test]
    fn test_starting_transitions() {
        assert_eq!(
            next(ProcessState::Starting, ProcessEvent::Ready),
            ProcessState::Ready
        );
        assert_eq!(next(ProcessState::Starting, EXIT_CLEAN), ProcessState::Stopped);
        assert_eq!(next(ProcessState::Starting, EXIT_CRASH), ProcessState::Failed);
        assert_eq!(next(ProcessState::Starting, EXIT_KILLED), ProcessState::Failed);
    }

    #[test]
    fn test_shutdown_sends_exactly_one_term() {
        let t = ProcessState::Ready.apply(ProcessEvent::ShutdownRequested);
        assert_eq!(t.next, ProcessState::Stopping);
        assert_eq!(t.effect, Effect::SendTerm);

        // A second shutdown request is a silent no-op.
        let t2 = t.next.apply(ProcessEvent::ShutdownRequested);
        assert_eq!(t2.next, ProcessState::Stopping);
        assert_eq!(t2.effect, Effect::None);
    }

    #[test]
    fn test_shutdown_while_starting() {
        let t = ProcessState::Starting.apply(ProcessEvent::ShutdownRequested);
        assert_eq!(t.next, ProcessState::Stopping);
        assert_eq!(t.effect, Effect::SendTerm);
    }

    #[test]
    fn test_duplicate_ready_is_ignored() {
        let t = ProcessState::Ready.apply(ProcessEvent::Ready);
        assert_eq!(t.next, ProcessState::Ready);
        assert_eq!(t.effect, Effect::None);
    }

    #[test]
    fn test_exit_while_ready_is_a_failure() {
        assert_eq!(next(ProcessState::Ready, EXIT_CLEAN), ProcessState::Failed);
        assert_eq!(next(ProcessState::Ready, EXIT_CRASH), ProcessState::Failed);
    }

    #[test]
    fn test_stopping_exit_outcomes() {
        // Any unforced exit completes the stop, even a non-zero one.
        assert_eq!(next(ProcessState::Stopping, EXIT_CLEAN), ProcessState::Stopped);
        assert_eq!(next(ProcessState::Stopping, EXIT_CRASH), ProcessState::Stopped);
        // An exit after timeout escalation is a failure.
        assert_eq!(next(ProcessState::Stopping, EXIT_KILLED), ProcessState::Failed);
    }

    #[test]
    fn test_kill_request_keeps_state_and_sends_kill() {
        for state in [
            ProcessState::Starting,
            ProcessState::Ready,
            ProcessState::Stopping,
        ] {
            let t = state.apply(ProcessEvent::KillRequested);
            assert_eq!(t.next, state, "kill must not transition {state}");
            assert_eq!(t.effect, Effect::SendKill);
        }
    }

    #[test]
    fn test_terminal_states_absorb_everything() {
        let events = [
            ProcessEvent::LaunchSucceeded,
            ProcessEvent::LaunchFailed,
            ProcessEvent::Ready,
            EXIT_CLEAN,
            EXIT_CRASH,
            EXIT_KILLED,
            ProcessEvent::ShutdownRequested,
            ProcessEvent::KillRequested,
        ];
        for state in [ProcessState::Stopped, ProcessState::Failed] {
            for event in events {
                let t = state.apply(event);
                assert_eq!(t.next, state, "{state} + {event:?}");
                assert_eq!(t.effect, Effect::None, "{state} + {event:?}");
            }
        }
    }

    #[test]
    fn test_undefined_pairs_keep_state_silently() {
        assert_eq!(
            next(ProcessState::New, ProcessEvent::Ready),
            ProcessState::New
        );
        assert_eq!(
            next(ProcessState::Starting, ProcessEvent::LaunchSucceeded),
            ProcessState::Starting
        );
        assert_eq!(
            effect(ProcessState::New, ProcessEvent::ShutdownRequested),
            Effect::None
        );
    }

    #[test]
    fn test_terminal_predicate() {
        assert!(ProcessState::Stopped.is_terminal());
        assert!(ProcessState::Failed.is_terminal());
        assert!(!ProcessState::Stopping.is_terminal());
    }

    #[test]
    fn test_exit_status_clean() {
        let ok = ExitStatus {
            code: 0,
            signal: None,
            error: None,
        };
        assert!(ok.clean());

        let killed = ExitStatus {
            code: -1,
            signal: Some(9),
            error: None,
        };
        assert!(!killed.clean());
    }
}
