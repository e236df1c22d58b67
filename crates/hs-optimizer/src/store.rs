//! In-memory registry of trials and worker sessions.

use hs_types::TrialId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::trial::{Trial, TrialStatus};

/// Coordinator-side record of one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSession {
    pub worker_id: String,
    pub current_trial_id: Option<TrialId>,
    /// Consecutive failures since the last successful completion.
    pub failure_count: u32,
    pub evicted: bool,
    pub trials_completed: usize,
}

impl WorkerSession {
    fn new(worker_id: &str) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            current_trial_id: None,
            failure_count: 0,
            evicted: false,
            trials_completed: 0,
        }
    }
}

/// Trials in creation order plus the worker-to-trial assignment table.
///
/// Carries no locking of its own; the coordinator owns it behind its lock.
#[derive(Debug, Default)]
pub struct TrialStore {
    trials: HashMap<TrialId, Trial>,
    order: Vec<TrialId>,
    sessions: HashMap<String, WorkerSession>,
}

impl TrialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total trials ever created, cancelled ones included.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn insert(&mut self, trial: Trial) {
        self.order.push(trial.id);
        self.trials.insert(trial.id, trial);
    }

    pub fn get(&self, trial_id: &TrialId) -> Option<&Trial> {
        self.trials.get(trial_id)
    }

    pub fn get_mut(&mut self, trial_id: &TrialId) -> Option<&mut Trial> {
        self.trials.get_mut(trial_id)
    }

    /// Trials in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Trial> {
        self.order.iter().filter_map(|id| self.trials.get(id))
    }

    pub fn count_by_status(&self, status: TrialStatus) -> usize {
        self.trials.values().filter(|t| t.status == status).count()
    }

    pub fn session(&self, worker_id: &str) -> Option<&WorkerSession> {
        self.sessions.get(worker_id)
    }

    /// Session for `worker_id`, created on first contact.
    pub fn session_mut(&mut self, worker_id: &str) -> &mut WorkerSession {
        self.sessions
            .entry(worker_id.to_string())
            .or_insert_with(|| WorkerSession::new(worker_id))
    }

    /// Trial currently bound to `worker_id`.
    pub fn current_trial(&self, worker_id: &str) -> Option<TrialId> {
        self.sessions
            .get(worker_id)
            .and_then(|s| s.current_trial_id)
    }

    /// Number of workers holding a trial right now.
    pub fn active_workers(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.current_trial_id.is_some())
            .count()
    }

    pub fn evicted_workers(&self) -> Vec<String> {
        let mut evicted: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.evicted)
            .map(|s| s.worker_id.clone())
            .collect();
        evicted.sort();
        evicted
    }

    pub fn bind(&mut self, worker_id: &str, trial_id: TrialId) {
        self.session_mut(worker_id).current_trial_id = Some(trial_id);
    }

    /// Unbind and return the worker's current trial.
    pub fn release(&mut self, worker_id: &str) -> Option<TrialId> {
        self.sessions
            .get_mut(worker_id)
            .and_then(|s| s.current_trial_id.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hs_types::ParameterSet;

    #[test]
    fn insert_preserves_creation_order() {
        let mut store = TrialStore::new();
        let a = Trial::new(0, ParameterSet::new(), "w1");
        let b = Trial::new(1, ParameterSet::new(), "w2");
        let (a_id, b_id) = (a.id, b.id);
        store.insert(a);
        store.insert(b);

        let ids: Vec<TrialId> = store.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a_id, b_id]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.count_by_status(TrialStatus::Running), 2);
    }

    #[test]
    fn bind_and_release() {
        let mut store = TrialStore::new();
        let trial = Trial::new(0, ParameterSet::new(), "w1");
        let id = trial.id;
        store.insert(trial);
        store.bind("w1", id);

        assert_eq!(store.current_trial("w1"), Some(id));
        assert_eq!(store.active_workers(), 1);

        assert_eq!(store.release("w1"), Some(id));
        assert_eq!(store.current_trial("w1"), None);
        assert_eq!(store.active_workers(), 0);
        assert_eq!(store.release("w1"), None);
        assert_eq!(store.release("never-seen"), None);
    }

    #[test]
    fn evicted_workers_sorted() {
        let mut store = TrialStore::new();
        store.session_mut("zeta").evicted = true;
        store.session_mut("alpha").evicted = true;
        store.session_mut("mid");
        assert_eq!(store.evicted_workers(), vec!["alpha", "zeta"]);
    }
}
