//! # Deadline tracking for supervised instances.
//!
//! [`TimeoutTracker`] holds one deadline per instance and periodically
//! sweeps them against the current time, emitting the identity of every
//! expired instance on an mpsc channel. The tracker attaches no meaning
//! to a timeout; the manager decides what expiry implies (a forceful
//! kill during the start or stop phase).
//!
//! ```text
//!   Manager ── add(id, timeout) ──► ┌────────────────┐
//!   Manager ── remove(id) ────────► │ TimeoutTracker │ ── expired id ──► Manager
//!                                   │  (100ms sweep) │
//!                                   └────────────────┘
//! ```
//!
//! The deadline map is the one piece of shared mutable state in the
//! crate guarded by a lock: it is written both by registration calls
//! from the manager loop and by the sweep task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::supervisor::InstanceId;

/// Interval between deadline sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// Tracks one deadline per instance and reports expiries.
#[derive(Clone)]
pub struct TimeoutTracker {
    deadlines: Arc<Mutex<HashMap<InstanceId, Instant>>>,
    tx: mpsc::UnboundedSender<InstanceId>,
}

impl TimeoutTracker {
    /// Creates a tracker plus the receiver on which expired instance
    /// ids are delivered.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InstanceId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                deadlines: Arc::new(Mutex::new(HashMap::new())),
                tx,
            },
            rx,
        )
    }

    /// Registers a deadline `now + timeout` for `id`.
    ///
    /// A zero timeout means "no timeout": nothing is tracked.
    /// Re-registering an id replaces its previous deadline.
    pub fn add(&self, id: InstanceId, timeout: Duration) {
        if timeout.is_zero() {
            return;
        }
        let deadline = Instant::now() + timeout;
        self.lock().insert(id, deadline);
    }

    /// Clears the deadline for `id`. Idempotent.
    pub fn remove(&self, id: InstanceId) {
        self.lock().remove(&id);
    }

    /// Spawns the periodic sweep, running until `token` is cancelled.
    pub fn run(&self, token: CancellationToken) -> JoinHandle<()> {
        let deadlines = Arc::clone(&self.deadlines);
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    now = tick.tick() => {
                        let expired = {
                            let mut map = deadlines.lock().unwrap_or_else(|e| e.into_inner());
                            let ids: Vec<InstanceId> = map
                                .iter()
                                .filter(|(_, deadline)| **deadline <= now)
                                .map(|(id, _)| *id)
                                .collect();
                            for id in &ids {
                                map.remove(id);
                            }
                            ids
                        };
                        for id in expired {
                            if tx.send(id).is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<InstanceId, Instant>> {
        self.deadlines.lock().unwrap_or_else(|e| e.into_inner())
    }
}
