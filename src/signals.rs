//! OS signal utilities: name parsing and shutdown-signal waiting.
//!
//! The control surface addresses signals by name ("TERM", "SIGHUP", …);
//! [`parse_signal`] maps those onto [`nix::sys::signal::Signal`] values
//! through a process-wide constant table. [`wait_for_shutdown_signal`]
//! completes when the daemon receives a termination signal (SIGINT,
//! SIGTERM, or Ctrl-C).

use nix::sys::signal::Signal;

use crate::error::ControlError;

/// Signal names accepted by the control surface.
pub const SIGNAL_TABLE: &[(&str, Signal)] = &[
    ("INT", Signal::SIGINT),
    ("TERM", Signal::SIGTERM),
    ("KILL", Signal::SIGKILL),
    ("HUP", Signal::SIGHUP),
    ("QUIT", Signal::SIGQUIT),
    ("USR1", Signal::SIGUSR1),
    ("USR2", Signal::SIGUSR2),
    ("STOP", Signal::SIGSTOP),
    ("CONT", Signal::SIGCONT),
];

/// Parses a signal name, case-insensitively, with or without the `SIG`
/// prefix.
pub fn parse_signal(name: &str) -> Result<Signal, ControlError> {
    let upper = name.to_ascii_uppercase();
    let short = upper.strip_prefix("SIG").unwrap_or(&upper);

    SIGNAL_TABLE
        .iter()
        .find(|(n, _)| *n == short)
        .map(|(_, sig)| *sig)
        .ok_or_else(|| ControlError::UnknownSignal(name.to_string()))
}

/// Completes when the process receives a termination signal.
///
/// Handles SIGINT and SIGTERM, with [`tokio::signal::ctrl_c`] awaited as
/// a fallback.
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_names() {
        assert_eq!(parse_signal("TERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("HUP").unwrap(), Signal::SIGHUP);
        assert_eq!(parse_signal("KILL").unwrap(), Signal::SIGKILL);
    }

    #[test]
    fn test_parse_accepts_sig_prefix_and_case() {
        assert_eq!(parse_signal("SIGTERM").unwrap(), Signal::SIGTERM);
        assert_eq!(parse_signal("sighup").unwrap(), Signal::SIGHUP);
        assert_eq!(parse_signal("usr1").unwrap(), Signal::SIGUSR1);
    }

    #[test]
    fn test_parse_unknown_signal() {
        let err = parse_signal("BOGUS").unwrap_err();
        assert_eq!(err, ControlError::UnknownSignal("BOGUS".into()));
    }
}
