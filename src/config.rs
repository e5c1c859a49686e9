//! # Worker process configuration and persistence.
//!
//! [`ProcessConfig`] describes how to launch one worker generation: the
//! command line, the working directory, and the start/stop timeouts. A
//! config is immutable once handed to a supervisor; request overrides
//! always operate on a fresh clone.
//!
//! The manager persists the config as JSON after every successful
//! promotion, so a restarted daemon resumes the last configuration that
//! actually became ready — never one from a failed start attempt. Saves
//! go through a temp file plus rename so a crash mid-write cannot leave
//! a truncated file behind.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use relevo::ProcessConfig;
//!
//! let mut cfg = ProcessConfig::default();
//! cfg.command = vec!["./worker".into(), "--port=0".into()];
//! cfg.start_timeout = Duration::from_secs(10);
//!
//! assert_eq!(cfg.stop_timeout, Duration::from_secs(30));
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

/// Configuration for one supervised worker generation.
///
/// A zero timeout means "no timeout": the corresponding phase is never
/// escalated to a forceful kill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessConfig {
    /// Argument vector; the first element is the executable.
    #[serde(default)]
    pub command: Vec<String>,
    /// Working directory for the child (inherited when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// Maximum time the worker may take to signal readiness.
    #[serde(with = "duration_millis", default = "default_timeout")]
    pub start_timeout: Duration,
    /// Maximum time the worker may take to exit after a graceful stop.
    #[serde(with = "duration_millis", default = "default_timeout")]
    pub stop_timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for ProcessConfig {
    /// Provides a default configuration:
    /// - `command` empty (must be supplied before the first start)
    /// - `cwd` inherited
    /// - `start_timeout = 30s`
    /// - `stop_timeout = 30s`
    fn default() -> Self {
        Self {
            command: Vec::new(),
            cwd: None,
            start_timeout: default_timeout(),
            stop_timeout: default_timeout(),
        }
    }
}

impl ProcessConfig {
    /// Reads a persisted config from `path`.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let data = fs::read(path).map_err(|e| RuntimeError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&data).map_err(|e| RuntimeError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Persists the config to `path`, atomically.
    ///
    /// Writes a sibling temp file first and renames it over the target,
    /// so readers observe either the old or the new config, never a
    /// partial write.
    pub fn save(&self, path: &Path) -> Result<(), RuntimeError> {
        let save_err = |source| RuntimeError::ConfigSave {
            path: path.to_path_buf(),
            source,
        };

        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| save_err(std::io::Error::other(e)))?;
        let tmp = tmp_path(path);
        fs::write(&tmp, data).map_err(save_err)?;
        fs::rename(&tmp, path).map_err(save_err)
    }
}

impl fmt::Display for ProcessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command={:?} start_timeout={:?} stop_timeout={:?}",
            self.command, self.start_timeout, self.stop_timeout
        )
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Durations serialized as integer milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
