//! Binding the external listening socket.
//!
//! The daemon owns the listening socket for its whole lifetime and lends
//! a duplicate to every worker generation, so the address spec is bound
//! exactly once at startup and the resulting descriptor is kept as an
//! [`OwnedFd`]. Accepted specs:
//!
//! - `tcp://HOST:PORT` — TCP listener
//! - `unix://PATH` — Unix domain listener
//! - `HOST:PORT` — TCP shorthand
//! - anything else — treated as a Unix socket path

use std::net::TcpListener;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;

use crate::error::RuntimeError;

/// Binds a listening socket described by `spec` and returns its
/// descriptor.
///
/// The listener stays in blocking mode: the descriptor is inherited by
/// worker processes that expect an ordinary fd 3.
pub fn bind_listener(spec: &str) -> Result<OwnedFd, RuntimeError> {
    let bind_err = |source| RuntimeError::Bind {
        addr: spec.to_string(),
        source,
    };

    if let Some(addr) = spec.strip_prefix("tcp://") {
        return TcpListener::bind(addr).map(OwnedFd::from).map_err(bind_err);
    }
    if let Some(path) = spec.strip_prefix("unix://") {
        return UnixListener::bind(path).map(OwnedFd::from).map_err(bind_err);
    }
    if spec.contains(':') {
        return TcpListener::bind(spec).map(OwnedFd::from).map_err(bind_err);
    }
    UnixListener::bind(spec).map(OwnedFd::from).map_err(bind_err)
}
