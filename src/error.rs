//! Error types used by the relevo runtime and control surface.
//!
//! This module defines two main error enums:
//!
//! - [`RuntimeError`] — errors raised by the supervisor runtime itself
//!   (socket binding, descriptor plumbing, config persistence).
//! - [`ControlError`] — errors reported back to a control-surface caller
//!   for rejected or failed requests.
//!
//! Both types provide an `as_label` helper returning a short stable
//! snake_case label for logs.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the supervisor runtime.
///
/// These represent failures of the orchestration machinery itself, as
/// opposed to failures of the supervised worker process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Binding the external listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The address spec that was being bound.
        addr: String,
        source: io::Error,
    },

    /// Duplicating the bind socket for a new child failed.
    #[error("failed to duplicate the bind socket: {source}")]
    SocketDup { source: io::Error },

    /// Creating the private notify channel failed.
    #[error("failed to create the notify channel: {source}")]
    NotifyChannel { source: io::Error },

    /// The OS refused to spawn the child process.
    #[error("failed to launch process: {source}")]
    Launch { source: io::Error },

    /// Reading the persisted process configuration failed.
    #[error("failed to load config from {path}: {reason}")]
    ConfigLoad { path: PathBuf, reason: String },

    /// Writing the process configuration failed.
    #[error("failed to save config to {path}: {source}")]
    ConfigSave { path: PathBuf, source: io::Error },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Bind { .. } => "bind_failed",
            RuntimeError::SocketDup { .. } => "socket_dup_failed",
            RuntimeError::NotifyChannel { .. } => "notify_channel_failed",
            RuntimeError::Launch { .. } => "launch_failed",
            RuntimeError::ConfigLoad { .. } => "config_load_failed",
            RuntimeError::ConfigSave { .. } => "config_save_failed",
        }
    }
}

/// Errors reported to a control-surface caller.
///
/// Rejected requests are not runtime failures: the manager stays healthy
/// and simply tells the caller why the request was refused.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    /// A start was requested while the manager is shutting down.
    #[error("start rejected, manager is shutting down")]
    ShuttingDown,

    /// A start was requested while another instance is already starting.
    #[error("start rejected, another process is already starting")]
    AlreadyStarting,

    /// Neither the request nor the persisted config carries a command.
    #[error("command is missing")]
    MissingCommand,

    /// The signal name in a kill request was not recognized.
    #[error("unknown signal {0:?}")]
    UnknownSignal(String),

    /// A waited start terminated before the worker signalled readiness.
    #[error("process exited before becoming ready (code {code})")]
    NeverReady {
        /// Exit code captured from the terminated instance.
        code: i32,
    },

    /// The manager loop is gone (daemon shutting down or crashed).
    #[error("manager is not running")]
    ManagerClosed,

    /// The runtime could not carry out an otherwise valid request.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControlError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ControlError::ShuttingDown => "shutting_down",
            ControlError::AlreadyStarting => "already_starting",
            ControlError::MissingCommand => "missing_command",
            ControlError::UnknownSignal(_) => "unknown_signal",
            ControlError::NeverReady { .. } => "never_ready",
            ControlError::ManagerClosed => "manager_closed",
            ControlError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_error_labels_are_stable() {
        assert_eq!(ControlError::ShuttingDown.as_label(), "shutting_down");
        assert_eq!(ControlError::AlreadyStarting.as_label(), "already_starting");
        assert_eq!(ControlError::NeverReady { code: 3 }.as_label(), "never_ready");
    }

    #[test]
    fn test_never_ready_carries_code_in_message() {
        let err = ControlError::NeverReady { code: 137 };
        assert!(err.to_string().contains("137"));
    }
}
