//! # Manager: the single serialization point.
//!
//! Every decision — control actions, timeout expiries, supervisor state
//! changes — funnels through one reactive loop, so no invariant ever
//! needs a lock: at most one instance starting, at most one serving
//! generation, config persisted only on promotion.
//!
//! ## High-level architecture
//! ```text
//!   control surface ──► Action ─────┐
//!   start TimeoutTracker ── expiry ─┼──► Manager loop ──► Supervisor directives
//!   stop  TimeoutTracker ── expiry ─┤        │                (shutdown/kill/signal)
//!   Supervisors ──► StateChange ────┘        │
//!                                            └──► config persistence (promotion)
//! ```
//!
//! ## Promotion
//! When the tracked starting instance reports READY the manager:
//! 1. re-validates the reporting identity (a mismatch is a logged bug,
//!    never a promotion),
//! 2. gracefully retires the previous READY generation (stop-timeout
//!    registered with the tracker),
//! 3. persists the promoted config — persistence errors are logged,
//!    never block the promotion,
//! 4. records the instance as the current generation and answers a
//!    waiting `run --wait` caller.
//!
//! The run loop finishes once the instance set drains: either after an
//! explicit shutdown or when the last (only) generation exits on its
//! own.

use std::collections::HashSet;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::error::ControlError;
use crate::process::{usage, ExitStatus, ProcessState};
use crate::rpc::api::{
    InfoReply, KillQuery, KillReply, ProcessInfo, ProcessQuery, PsReply, StartQuery, StartReply,
};
use crate::signals::parse_signal;
use crate::supervisor::{InstanceId, StateChange, Supervisor};
use crate::timeout::TimeoutTracker;

use super::actions::Action;
use super::set::{Instance, InstanceSet};

/// A `run --wait` caller blocked until its instance becomes ready.
struct PendingStart {
    id: InstanceId,
    reply: oneshot::Sender<Result<StartReply, ControlError>>,
}

/// A `kill --wait` caller blocked until every matched instance exits.
struct KillWait {
    ids: HashSet<InstanceId>,
    reply: oneshot::Sender<Result<KillReply, ControlError>>,
}

/// Cloneable handle for submitting actions to the manager loop.
#[derive(Clone)]
pub struct ManagerHandle {
    tx: mpsc::UnboundedSender<Action>,
}

impl ManagerHandle {
    /// Starts (or replaces) the worker.
    pub async fn start(&self, query: StartQuery) -> Result<StartReply, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Action::Start { query, reply: tx })?;
        rx.await.map_err(|_| ControlError::ManagerClosed)?
    }

    /// Restarts with the persisted configuration (SIGHUP behavior).
    pub async fn reload(&self) -> Result<StartReply, ControlError> {
        self.start(StartQuery::default()).await
    }

    /// Snapshots the instance set.
    pub async fn ps(&self, query: ProcessQuery) -> Result<PsReply, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Action::Ps { query, reply: tx })?;
        rx.await.map_err(|_| ControlError::ManagerClosed)
    }

    /// Signals matching instances.
    pub async fn kill(&self, query: KillQuery) -> Result<KillReply, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Action::Kill { query, reply: tx })?;
        rx.await.map_err(|_| ControlError::ManagerClosed)?
    }

    /// Build/version metadata and live instance count.
    pub async fn info(&self) -> Result<InfoReply, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.submit(Action::Info { reply: tx })?;
        rx.await.map_err(|_| ControlError::ManagerClosed)
    }

    /// Requests a graceful shutdown of every instance. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Action::Shutdown);
    }

    fn submit(&self, action: Action) -> Result<(), ControlError> {
        self.tx.send(action).map_err(|_| ControlError::ManagerClosed)
    }
}

/// Owns the instance set and serializes every control decision.
pub struct Manager {
    config_path: PathBuf,
    config: Arc<ProcessConfig>,
    bind: OwnedFd,
    next_id: u32,
    set: InstanceSet,
    shutting_down: bool,

    actions_tx: mpsc::UnboundedSender<Action>,
    actions_rx: mpsc::UnboundedReceiver<Action>,
    notes_tx: mpsc::UnboundedSender<StateChange>,
    notes_rx: mpsc::UnboundedReceiver<StateChange>,

    starting_tracker: TimeoutTracker,
    starting_rx: mpsc::UnboundedReceiver<InstanceId>,
    stopping_tracker: TimeoutTracker,
    stopping_rx: mpsc::UnboundedReceiver<InstanceId>,

    pending_start: Option<PendingStart>,
    kill_waits: Vec<KillWait>,
}

impl Manager {
    /// Creates a manager owning `bind` for the daemon's lifetime.
    ///
    /// The persisted config at `config_path` is loaded when present; a
    /// missing or unreadable file is logged and replaced by defaults
    /// (the first `run` must then carry a command).
    pub fn new(config_path: PathBuf, bind: OwnedFd) -> Self {
        let config = match ProcessConfig::load(&config_path) {
            Ok(config) => {
                info!(%config, "loaded persisted config");
                config
            }
            Err(e) => {
                warn!(error = %e, "could not load config file");
                ProcessConfig::default()
            }
        };

        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (notes_tx, notes_rx) = mpsc::unbounded_channel();
        let (starting_tracker, starting_rx) = TimeoutTracker::new();
        let (stopping_tracker, stopping_rx) = TimeoutTracker::new();

        Self {
            config_path,
            config: Arc::new(config),
            bind,
            next_id: 0,
            set: InstanceSet::default(),
            shutting_down: false,
            actions_tx,
            actions_rx,
            notes_tx,
            notes_rx,
            starting_tracker,
            starting_rx,
            stopping_tracker,
            stopping_rx,
            pending_start: None,
            kill_waits: Vec::new(),
        }
    }

    /// Returns a handle for submitting actions.
    pub fn handle(&self) -> ManagerHandle {
        ManagerHandle {
            tx: self.actions_tx.clone(),
        }
    }

    /// Runs the manager loop until the instance set drains.
    ///
    /// Starts the persisted config immediately when it carries a
    /// command, so a restarted daemon resumes the last-known-good
    /// worker without operator intervention.
    pub async fn run(mut self) {
        if !self.config.command.is_empty() {
            let config = (*self.config).clone();
            if let Err(e) = self.start_instance(config) {
                warn!(error = %e, "could not start the persisted config");
            }
        }

        let token = CancellationToken::new();
        let _sweep_start = self.starting_tracker.run(token.clone());
        let _sweep_stop = self.stopping_tracker.run(token.clone());

        loop {
            tokio::select! {
                Some(action) = self.actions_rx.recv() => {
                    if self.handle_action(action) {
                        break;
                    }
                }
                Some(id) = self.starting_rx.recv() => self.on_timeout(id, "start"),
                Some(id) = self.stopping_rx.recv() => self.on_timeout(id, "stop"),
                Some(note) = self.notes_rx.recv() => {
                    if self.on_state_change(note) {
                        break;
                    }
                }
            }
        }

        token.cancel();
        info!("manager finished");
    }

    /// Handles one action; true when the manager is done.
    fn handle_action(&mut self, action: Action) -> bool {
        match action {
            Action::Shutdown => self.on_shutdown(),
            Action::Start { query, reply } => {
                self.on_start(query, reply);
                false
            }
            Action::Ps { query, reply } => {
                let _ = reply.send(self.snapshot(&query));
                false
            }
            Action::Kill { query, reply } => {
                self.on_kill(query, reply);
                false
            }
            Action::Info { reply } => {
                let _ = reply.send(self.info());
                false
            }
        }
    }

    fn on_shutdown(&mut self) -> bool {
        if self.shutting_down {
            debug!("already shutting down");
            return self.set.is_empty();
        }
        info!("shutting down");
        self.shutting_down = true;
        for id in self.set.ids() {
            self.stop_instance(id);
        }
        self.set.is_empty()
    }

    fn on_start(
        &mut self,
        query: StartQuery,
        reply: oneshot::Sender<Result<StartReply, ControlError>>,
    ) {
        if self.shutting_down {
            warn!("ignoring start, manager is shutting down");
            let _ = reply.send(Err(ControlError::ShuttingDown));
            return;
        }
        if self.set.starting().is_some() {
            warn!("ignoring start, another process is already starting");
            let _ = reply.send(Err(ControlError::AlreadyStarting));
            return;
        }

        // Overrides always operate on a fresh clone of the promoted
        // config; the original stays untouched until promotion.
        let mut config = (*self.config).clone();
        if !query.command.is_empty() {
            config.command = query.command;
        }
        if let Some(cwd) = query.cwd {
            config.cwd = Some(cwd);
        }
        if let Some(ms) = query.start_timeout {
            config.start_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = query.stop_timeout {
            config.stop_timeout = Duration::from_millis(ms);
        }

        match self.start_instance(config) {
            Ok(id) if query.wait => {
                debug!(%id, "caller waiting for the process to become ready");
                self.pending_start = Some(PendingStart { id, reply });
            }
            Ok(_) => {
                let _ = reply.send(Ok(StartReply::default()));
            }
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    fn start_instance(&mut self, config: ProcessConfig) -> Result<InstanceId, ControlError> {
        if config.command.is_empty() {
            return Err(ControlError::MissingCommand);
        }

        let bind = self.bind.try_clone().map_err(|e| {
            warn!(error = %e, "could not duplicate the bind socket");
            ControlError::Internal(format!("bind socket duplication failed: {e}"))
        })?;

        self.next_id += 1;
        let id = InstanceId(self.next_id);
        let config = Arc::new(config);
        info!(%id, %config, "starting a new process");

        let handle = Supervisor::spawn(id, Arc::clone(&config), bind, self.notes_tx.clone());
        self.starting_tracker.add(id, config.start_timeout);
        self.set.insert(
            id,
            Instance {
                state: ProcessState::New,
                pid: None,
                config,
                handle,
            },
        );
        Ok(id)
    }

    /// Issues a graceful stop and registers the stop deadline. A no-op
    /// for instances already stopping or finished, so repeated requests
    /// produce a single terminate signal.
    fn stop_instance(&mut self, id: InstanceId) {
        let stop_timeout = {
            let Some(instance) = self.set.get_mut(id) else {
                return;
            };
            if instance.state == ProcessState::Stopping || instance.state.is_terminal() {
                return;
            }
            info!(%id, "stopping process");
            instance.handle.shutdown();
            instance.state = ProcessState::Stopping;
            instance.config.stop_timeout
        };
        self.starting_tracker.remove(id);
        self.stopping_tracker.add(id, stop_timeout);
    }

    fn on_kill(
        &mut self,
        query: KillQuery,
        reply: oneshot::Sender<Result<KillReply, ControlError>>,
    ) {
        let sig = match query.signal.as_deref() {
            None | Some("") => Signal::SIGTERM,
            Some(name) => match parse_signal(name) {
                Ok(sig) => sig,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return;
                }
            },
        };

        let ids = self.set.matching(&query.query);
        for id in &ids {
            if let Some(instance) = self.set.get(*id) {
                info!(id = %id, signal = %sig, "delivering signal");
                instance.handle.signal(sig);
            }
        }

        if query.wait && !ids.is_empty() {
            self.kill_waits.push(KillWait {
                ids: ids.into_iter().collect(),
                reply,
            });
        } else {
            let _ = reply.send(Ok(KillReply::default()));
        }
    }

    fn snapshot(&self, query: &ProcessQuery) -> PsReply {
        let ids = if query.is_empty() {
            self.set.ids()
        } else {
            self.set.matching(query)
        };

        let processes = ids
            .into_iter()
            .filter_map(|id| self.set.get(id).map(|instance| (id, instance)))
            .map(|(id, instance)| ProcessInfo {
                id: id.0,
                pid: instance.pid,
                state: instance.state.as_str().to_string(),
                command: instance.config.command.clone(),
                usage: instance.pid.and_then(usage::sample),
            })
            .collect();

        PsReply { processes }
    }

    fn info(&self) -> InfoReply {
        InfoReply {
            version: env!("CARGO_PKG_VERSION").to_string(),
            build: option_env!("RELEVO_BUILD").unwrap_or("dev").to_string(),
            instances: self.set.len(),
        }
    }

    fn on_timeout(&mut self, id: InstanceId, phase: &'static str) {
        // The instance may have exited between expiry and delivery.
        let Some(instance) = self.set.get(id) else {
            return;
        };
        warn!(%id, phase, "did not finish the {phase} phase in time, killing");
        instance.handle.kill();
    }

    /// Processes one supervisor notification; true when the manager is
    /// done (set drained).
    fn on_state_change(&mut self, note: StateChange) -> bool {
        let StateChange {
            id,
            state,
            pid,
            exit,
        } = note;

        match state {
            ProcessState::Starting => {
                if let Some(instance) = self.set.get_mut(id) {
                    instance.pid = pid;
                    instance.state = ProcessState::Starting;
                }
                false
            }
            ProcessState::Ready => {
                self.on_ready(id);
                false
            }
            ProcessState::Stopping => {
                // Confirmation of a stop the manager already recorded.
                if let Some(instance) = self.set.get_mut(id) {
                    instance.state = ProcessState::Stopping;
                }
                false
            }
            ProcessState::Stopped | ProcessState::Failed => self.on_terminal(id, state, exit),
            ProcessState::New => false,
        }
    }

    fn on_ready(&mut self, id: InstanceId) {
        self.starting_tracker.remove(id);

        // Promotion acts only on the instance the manager is tracking
        // as starting; anything else is a bug somewhere, not a reason
        // to disturb the serving generation.
        if self.set.starting() != Some(id) {
            warn!(%id, "readiness from an instance that is not starting, ignoring");
            return;
        }
        info!(%id, "process is ready");

        if let Some(previous) = self.set.current() {
            info!(%previous, "retiring the previous generation");
            self.stop_instance(previous);
        }

        if let Some(instance) = self.set.get_mut(id) {
            instance.state = ProcessState::Ready;
            self.config = Arc::clone(&instance.config);
        }

        if let Err(e) = self.config.save(&self.config_path) {
            warn!(error = %e, "failed to persist the promoted config");
        }

        if let Some(pending) = self.pending_start.take() {
            if pending.id == id {
                let _ = pending.reply.send(Ok(StartReply::default()));
            } else {
                self.pending_start = Some(pending);
            }
        }
    }

    fn on_terminal(
        &mut self,
        id: InstanceId,
        state: ProcessState,
        exit: Option<ExitStatus>,
    ) -> bool {
        self.starting_tracker.remove(id);
        self.stopping_tracker.remove(id);

        if let Some(pending) = self.pending_start.take() {
            if pending.id == id {
                let code = exit.as_ref().map(|status| status.code).unwrap_or(-1);
                let _ = pending.reply.send(Err(ControlError::NeverReady { code }));
            } else {
                self.pending_start = Some(pending);
            }
        }

        match self.set.remove(id) {
            Some(_) => match &exit {
                Some(status) => info!(%id, %state, %status, "process exited"),
                None => info!(%id, %state, "process reaped"),
            },
            None => {
                warn!(%id, %state, "terminal state for an unknown instance");
                return false;
            }
        }

        let mut remaining = Vec::with_capacity(self.kill_waits.len());
        for mut wait in std::mem::take(&mut self.kill_waits) {
            wait.ids.remove(&id);
            if wait.ids.is_empty() {
                let _ = wait.reply.send(Ok(KillReply::default()));
            } else {
                remaining.push(wait);
            }
        }
        self.kill_waits = remaining;

        self.set.is_empty()
    }
}
