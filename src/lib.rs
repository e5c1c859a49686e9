//! # relevo
//!
//! **Relevo** is a zero-downtime supervisor for one externally-facing
//! worker process. It owns the bound listening socket, launches workers
//! that inherit that socket plus a private notification channel, and
//! lets an operator replace the running worker — new binary, new
//! config, new command line — without ever closing the socket.
//!
//! The worker decides when it is ready: once it writes `READY=1` on the
//! notify channel, the previous generation is gracefully retired and
//! the new configuration becomes the persisted last-known-good.
//!
//! ## Architecture
//! ```text
//!                         ┌─────────────────────────────────────────┐
//!   relevoctl ── rpc ───► │  Manager (single serialization point)   │
//!   SIGHUP / SIGTERM ───► │  - instance set (id → state, handle)    │
//!                         │  - start/stop TimeoutTrackers           │
//!                         │  - config persistence on promotion      │
//!                         └───────┬─────────────────────┬───────────┘
//!                            directives             state changes
//!                                 ▼                     │
//!                         ┌──────────────┐   ┌──────────────┐
//!                         │  Supervisor  │   │  Supervisor  │   (one per
//!                         │  (FSM actor) │   │  (FSM actor) │    generation)
//!                         └──────┬───────┘   └──────┬───────┘
//!                                ▼                  ▼
//!                         worker process     worker process
//!                          fd 3: socket       fd 3: socket (duplicate)
//!                          fd 4: notify       fd 4: notify (private)
//! ```
//!
//! ## Lifecycle
//! ```text
//! run ──► Manager ──► Supervisor ──► launch(fd 3, fd 4)
//!
//!   NEW ──► STARTING ──► READY ──► STOPPING ──► STOPPED | FAILED
//!              │            │
//!              │            └─ promotion: retire previous READY,
//!              │               persist config, record new current
//!              └─ start-timeout: force-kill, exit flows through the
//!                 normal exit path and is marked FAILED
//! ```
//!
//! ## Features
//! | Area             | Description                                          | Key types                         |
//! |------------------|------------------------------------------------------|-----------------------------------|
//! | **Lifecycle**    | Explicit FSM with a pure transition table.           | [`ProcessState`], [`ProcessEvent`]|
//! | **Supervision**  | One reactive actor per worker generation.            | [`Supervisor`], [`StateChange`]   |
//! | **Orchestration**| Serialized start/promote/retire/shutdown decisions.  | [`Manager`], [`ManagerHandle`]    |
//! | **Deadlines**    | Start/stop timeouts with forceful-kill escalation.   | [`TimeoutTracker`]                |
//! | **Control**      | `run` / `ps` / `kill` / `info` over a Unix socket.   | [`rpc::api::Request`]             |
//! | **Persistence**  | Promoted config saved atomically, resumed at boot.   | [`ProcessConfig`]                 |

mod config;
mod error;
mod manager;
mod netutil;
mod process;
mod signals;
mod supervisor;
mod timeout;

pub mod rpc;

// ---- Public re-exports ----

pub use config::ProcessConfig;
pub use error::{ControlError, RuntimeError};
pub use manager::{Action, Manager, ManagerHandle};
pub use netutil::bind_listener;
pub use process::{Effect, ExitStatus, ProcessEvent, ProcessState, ResourceUsage, Transition};
pub use signals::{parse_signal, wait_for_shutdown_signal, SIGNAL_TABLE};
pub use supervisor::{Directive, InstanceId, StateChange, Supervisor, SupervisorHandle};
pub use timeout::TimeoutTracker;
