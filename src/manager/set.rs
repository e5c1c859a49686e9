//! The manager's id-keyed table of supervised instances.
//!
//! States are mirrored here from supervisor notifications (plus the
//! manager's own optimistic STOPPING mark when it issues a retirement),
//! so queries and invariant checks never reach into a supervisor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ProcessConfig;
use crate::process::ProcessState;
use crate::rpc::api::ProcessQuery;
use crate::supervisor::{InstanceId, SupervisorHandle};

/// One tracked instance: mirrored state plus the control handle.
pub(crate) struct Instance {
    pub state: ProcessState,
    pub pid: Option<i32>,
    pub config: Arc<ProcessConfig>,
    pub handle: SupervisorHandle,
}

/// Mapping from instance identity to lifecycle state and handle.
#[derive(Default)]
pub(crate) struct InstanceSet {
    entries: HashMap<InstanceId, Instance>,
}

impl InstanceSet {
    pub fn insert(&mut self, id: InstanceId, instance: Instance) {
        self.entries.insert(id, instance);
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<Instance> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.entries.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All ids, ascending — stable order for `ps` output and shutdown.
    pub fn ids(&self) -> Vec<InstanceId> {
        let mut ids: Vec<InstanceId> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    /// The instance currently being brought up (NEW or STARTING), if
    /// any. The at-most-one-starting invariant makes this unique.
    pub fn starting(&self) -> Option<InstanceId> {
        self.find(|state| matches!(state, ProcessState::New | ProcessState::Starting))
    }

    /// The current serving generation (READY), if any.
    pub fn current(&self) -> Option<InstanceId> {
        self.find(|state| state == ProcessState::Ready)
    }

    /// Ids matching a control-surface filter, ascending.
    ///
    /// State flags select instances in any of the named states; a pid
    /// filter further restricts the match. An empty query matches
    /// nothing — `ps` handles "no filter means everything" itself, so
    /// that `kill` can never mass-signal by accident.
    pub fn matching(&self, query: &ProcessQuery) -> Vec<InstanceId> {
        if query.is_empty() {
            return Vec::new();
        }
        let by_state = query.starting || query.ready || query.stopping;

        let mut ids: Vec<InstanceId> = self
            .entries
            .iter()
            .filter(|(_, instance)| {
                if by_state {
                    let wanted = match instance.state {
                        ProcessState::New | ProcessState::Starting => query.starting,
                        ProcessState::Ready => query.ready,
                        ProcessState::Stopping => query.stopping,
                        ProcessState::Stopped | ProcessState::Failed => false,
                    };
                    if !wanted {
                        return false;
                    }
                }
                match query.pid {
                    Some(pid) => instance.pid == Some(pid),
                    None => true,
                }
            })
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        ids
    }

    fn find(&self, pred: impl Fn(ProcessState) -> bool) -> Option<InstanceId> {
        self.entries
            .iter()
            .find(|(_, instance)| pred(instance.state))
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(state: ProcessState, pid: Option<i32>) -> Instance {
        Instance {
            state,
            pid,
            config: Arc::new(ProcessConfig::default()),
            handle: SupervisorHandle::detached(),
        }
    }

    fn set_with(states: &[(u32, ProcessState)]) -> InstanceSet {
        let mut set = InstanceSet::default();
        for (id, state) in states {
            set.insert(InstanceId(*id), instance(*state, Some(*id as i32 + 100)));
        }
        set
    }

    #[test]
    fn test_starting_covers_new_and_starting() {
        let set = set_with(&[(1, ProcessState::Ready), (2, ProcessState::New)]);
        assert_eq!(set.starting(), Some(InstanceId(2)));

        let set = set_with(&[(1, ProcessState::Ready), (2, ProcessState::Starting)]);
        assert_eq!(set.starting(), Some(InstanceId(2)));

        let set = set_with(&[(1, ProcessState::Ready), (2, ProcessState::Stopping)]);
        assert_eq!(set.starting(), None);
    }

    #[test]
    fn test_current_is_the_ready_instance() {
        let set = set_with(&[
            (1, ProcessState::Stopping),
            (2, ProcessState::Ready),
            (3, ProcessState::Starting),
        ]);
        assert_eq!(set.current(), Some(InstanceId(2)));
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let set = set_with(&[(1, ProcessState::Ready)]);
        assert!(set.matching(&ProcessQuery::default()).is_empty());
    }

    #[test]
    fn test_state_filters() {
        let set = set_with(&[
            (1, ProcessState::Stopping),
            (2, ProcessState::Ready),
            (3, ProcessState::Starting),
            (4, ProcessState::Stopping),
        ]);

        let ready = ProcessQuery {
            ready: true,
            ..ProcessQuery::default()
        };
        assert_eq!(set.matching(&ready), vec![InstanceId(2)]);

        let stopping = ProcessQuery {
            stopping: true,
            ..ProcessQuery::default()
        };
        assert_eq!(set.matching(&stopping), vec![InstanceId(1), InstanceId(4)]);
    }

    #[test]
    fn test_pid_filter_restricts_state_match() {
        let set = set_with(&[(1, ProcessState::Stopping), (2, ProcessState::Stopping)]);

        let query = ProcessQuery {
            stopping: true,
            pid: Some(102),
            ..ProcessQuery::default()
        };
        assert_eq!(set.matching(&query), vec![InstanceId(2)]);

        let pid_only = ProcessQuery {
            pid: Some(101),
            ..ProcessQuery::default()
        };
        assert_eq!(set.matching(&pid_only), vec![InstanceId(1)]);
    }

    #[test]
    fn test_terminal_states_never_match_state_filters() {
        let set = set_with(&[(1, ProcessState::Failed), (2, ProcessState::Stopped)]);
        let query = ProcessQuery {
            starting: true,
            ready: true,
            stopping: true,
            ..ProcessQuery::default()
        };
        assert!(set.matching(&query).is_empty());
    }
}
