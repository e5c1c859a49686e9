//! # Control protocol contracts.
//!
//! One request object per line, one response envelope per line. Every
//! query struct tolerates missing fields so older clients keep working
//! against newer daemons.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::process::ResourceUsage;

/// A control request, dispatched by method name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Start (or replace) the worker.
    Run(StartQuery),
    /// List supervised instances.
    Ps(ProcessQuery),
    /// Signal matching instances.
    Kill(KillQuery),
    /// Daemon metadata.
    Info,
}

/// Parameters for `run`.
///
/// Empty/absent fields inherit the currently promoted configuration;
/// timeouts are in milliseconds, zero meaning "no timeout".
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StartQuery {
    pub command: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub start_timeout: Option<u64>,
    pub stop_timeout: Option<u64>,
    /// Block until the instance is ready (or has failed).
    pub wait: bool,
}

/// Instance filters shared by `ps` and `kill`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessQuery {
    /// Match the instance being brought up (NEW or STARTING).
    pub starting: bool,
    /// Match the serving generation (READY).
    pub ready: bool,
    /// Match draining generations (STOPPING).
    pub stopping: bool,
    /// Match by OS process id.
    pub pid: Option<i32>,
}

impl ProcessQuery {
    /// True when no filter is set at all.
    pub fn is_empty(&self) -> bool {
        !self.starting && !self.ready && !self.stopping && self.pid.is_none()
    }
}

/// Parameters for `kill`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KillQuery {
    #[serde(flatten)]
    pub query: ProcessQuery,
    /// Signal name ("TERM", "SIGHUP", …); graceful-terminate when
    /// absent.
    pub signal: Option<String>,
    /// Block until every matched instance has exited.
    pub wait: bool,
}

/// Reply to `run`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StartReply {
    /// Exit code of a waited start that failed before becoming ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
}

/// One row of `ps` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: u32,
    pub pid: Option<i32>,
    pub state: String,
    pub command: Vec<String>,
    pub usage: Option<ResourceUsage>,
}

/// Reply to `ps`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PsReply {
    pub processes: Vec<ProcessInfo>,
}

/// Reply to `kill`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct KillReply {}

/// Reply to `info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoReply {
    pub version: String,
    pub build: String,
    /// Number of instances currently tracked.
    pub instances: usize,
}

/// Response framing: exactly one envelope per request line.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            ok: true,
            error: None,
            data: Some(data),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            data: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_lines_round_trip() {
        let request = Request::Run(StartQuery {
            command: vec!["/bin/server".into()],
            wait: true,
            ..StartQuery::default()
        });
        let line = serde_json::to_string(&request).unwrap();
        assert!(line.contains(r#""method":"run"#), "line: {line}");

        match serde_json::from_str::<Request>(&line).unwrap() {
            Request::Run(query) => {
                assert_eq!(query.command, vec!["/bin/server".to_string()]);
                assert!(query.wait);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_info_needs_no_params() {
        let request: Request = serde_json::from_str(r#"{"method":"info"}"#).unwrap();
        assert!(matches!(request, Request::Info));
    }

    #[test]
    fn test_kill_defaults() {
        let request: Request =
            serde_json::from_str(r#"{"method":"kill","params":{"ready":true}}"#).unwrap();
        match request {
            Request::Kill(query) => {
                assert!(query.query.ready);
                assert!(!query.query.starting);
                assert_eq!(query.signal, None);
                assert!(!query.wait);
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn test_envelope_skips_empty_fields() {
        let envelope = Envelope::success(KillReply::default());
        let line = serde_json::to_string(&envelope).unwrap();
        assert_eq!(line, r#"{"ok":true,"data":{}}"#);

        let envelope = Envelope::<KillReply>::failure("nope");
        let line = serde_json::to_string(&envelope).unwrap();
        assert_eq!(line, r#"{"ok":false,"error":"nope"}"#);
    }
}
