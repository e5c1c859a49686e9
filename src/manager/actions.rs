//! Control actions delivered to the manager loop.
//!
//! Every externally generated decision reaches the manager as one of
//! these messages; replies travel back on oneshot channels so callers
//! can await them without ever touching manager state.

use tokio::sync::oneshot;

use crate::error::ControlError;
use crate::rpc::api::{InfoReply, KillQuery, KillReply, ProcessQuery, PsReply, StartQuery, StartReply};

/// A control action plus its reply channel.
pub enum Action {
    /// Start (or replace) the worker; reply may be deferred until the
    /// instance is ready when the caller asked to wait.
    Start {
        query: StartQuery,
        reply: oneshot::Sender<Result<StartReply, ControlError>>,
    },
    /// Snapshot the instance set.
    Ps {
        query: ProcessQuery,
        reply: oneshot::Sender<PsReply>,
    },
    /// Signal matching instances; reply may be deferred until they exit.
    Kill {
        query: KillQuery,
        reply: oneshot::Sender<Result<KillReply, ControlError>>,
    },
    /// Build/version metadata and live instance count.
    Info { reply: oneshot::Sender<InfoReply> },
    /// Graceful shutdown of every instance; idempotent.
    Shutdown,
}
