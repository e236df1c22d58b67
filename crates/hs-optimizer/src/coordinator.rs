//! The search coordinator: admission control, trial issuance, completion and
//! failure/eviction policy over a single lock-guarded state.
//!
//! Every mutating operation takes the write lock once and does all of its
//! checks and transitions inside it, so a budget check and the trial creation
//! it guards can never interleave with another worker's request. Nothing
//! inside the lock blocks: sampling and map updates only. Export events are
//! collected while locked and sent after the lock is released.

use crossbeam_channel::Sender;
use hs_types::{SearchError, SearchResult, TrialId, TrialOffer, TrialPayload};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::export::SearchEvent;
use crate::search::{HyperparameterSpace, RandomSearch, SearchStrategy};
use crate::store::{TrialStore, WorkerSession};
use crate::trial::{SearchConfig, SearchSummary, Trial, TrialResult, TrialStatus};

/// Outcome of any operation that hands out work.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialAssignment {
    /// A trial the worker must now run.
    Offer(TrialOffer),
    /// The trial budget is spent; the worker should stop.
    Exhausted,
    /// The worker exceeded its failure budget and gets no further trials.
    Evicted,
}

impl TrialAssignment {
    pub fn offer(&self) -> Option<&TrialOffer> {
        match self {
            Self::Offer(offer) => Some(offer),
            _ => None,
        }
    }

    pub fn trial_id(&self) -> Option<TrialId> {
        self.offer().map(|o| o.trial_id)
    }

    /// Flatten to the wire shape, where exhaustion and eviction share the
    /// empty sentinel.
    pub fn into_payload(self) -> TrialPayload {
        match self {
            Self::Offer(offer) => offer.into(),
            Self::Exhausted | Self::Evicted => TrialPayload::exhausted(),
        }
    }
}

struct CoordinatorState {
    store: TrialStore,
    strategy: Box<dyn SearchStrategy>,
    /// Trials counted against `max_trials`; cancellation gives a slot back.
    created_count: usize,
    best_trial: Option<TrialResult>,
}

/// Shared, lock-guarded search state. Wrap in an `Arc` and hand the same
/// instance to every request handler for the lifetime of the process.
pub struct SearchCoordinator {
    config: SearchConfig,
    space: HyperparameterSpace,
    state: RwLock<CoordinatorState>,
    events: Option<Sender<SearchEvent>>,
}

impl SearchCoordinator {
    /// Coordinator using random search, seeded from `config.seed` when set.
    pub fn new(config: SearchConfig, space: HyperparameterSpace) -> SearchResult<Self> {
        let strategy: Box<dyn SearchStrategy> = match config.seed {
            Some(seed) => Box::new(RandomSearch::with_seed(space.clone(), seed)),
            None => Box::new(RandomSearch::new(space.clone())),
        };
        Self::with_strategy(config, space, strategy)
    }

    pub fn with_strategy(
        config: SearchConfig,
        space: HyperparameterSpace,
        strategy: Box<dyn SearchStrategy>,
    ) -> SearchResult<Self> {
        config.validate()?;
        space.validate()?;

        info!(
            objective = %config.objective,
            max_trials = config.max_trials,
            max_parallel_workers = config.max_parallel_workers,
            max_fails_per_worker = config.max_fails_per_worker,
            strategy = strategy.name(),
            "search coordinator initialized"
        );

        Ok(Self {
            config,
            space,
            state: RwLock::new(CoordinatorState {
                store: TrialStore::new(),
                strategy,
                created_count: 0,
                best_trial: None,
            }),
            events: None,
        })
    }

    /// Send trial and summary snapshots to `sink` after every mutation.
    pub fn with_event_sink(mut self, sink: Sender<SearchEvent>) -> Self {
        self.events = Some(sink);
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn space(&self) -> &HyperparameterSpace {
        &self.space
    }

    /// Hyperparameter names in canonical order.
    pub fn hyperparameter_names(&self) -> Vec<String> {
        self.space.names()
    }

    // -- Mutating operations ------------------------------------------------

    /// Admit a worker and hand it its first trial.
    ///
    /// A worker that already holds a trial gets that same trial back.
    pub fn register_worker(&self, worker_id: &str) -> SearchResult<TrialAssignment> {
        let mut events = Vec::new();
        let assignment = {
            let mut guard = self.state.write();
            let state = &mut *guard;

            let holds_trial = state.store.current_trial(worker_id).is_some();
            let evicted = state.store.session(worker_id).is_some_and(|s| s.evicted);
            let active = state.store.active_workers();

            if !evicted && !holds_trial && active >= self.config.max_parallel_workers {
                warn!(
                    worker_id,
                    active,
                    limit = self.config.max_parallel_workers,
                    "admission rejected"
                );
                return Err(SearchError::AdmissionRejected {
                    active,
                    limit: self.config.max_parallel_workers,
                });
            }

            state.store.session_mut(worker_id);
            if evicted {
                debug!(worker_id, "evicted worker asked to start");
            } else {
                info!(worker_id, "worker admitted");
            }
            let assignment = self.issue_locked(state, worker_id, &mut events)?;
            self.push_summary(state, &mut events);
            assignment
        };
        self.emit(events);
        Ok(assignment)
    }

    /// Create a trial for `worker_id` if budget remains.
    pub fn issue_trial(&self, worker_id: &str) -> SearchResult<TrialAssignment> {
        let mut events = Vec::new();
        let assignment = {
            let mut guard = self.state.write();
            let state = &mut *guard;
            let assignment = self.issue_locked(state, worker_id, &mut events)?;
            self.push_summary(state, &mut events);
            assignment
        };
        self.emit(events);
        Ok(assignment)
    }

    /// Record the result of a trial and hand the worker its next one in the
    /// same critical section.
    pub fn complete_trial(
        &self,
        trial_id: &TrialId,
        objective: f64,
        metrics: HashMap<String, f64>,
        worker_id: &str,
    ) -> SearchResult<TrialAssignment> {
        let mut events = Vec::new();
        let assignment = {
            let mut guard = self.state.write();
            let state = &mut *guard;

            let Some(trial) = state.store.get_mut(trial_id) else {
                warn!(trial_id = %trial_id, worker_id, "completion for unknown trial rejected");
                return Err(SearchError::UnknownTrial {
                    trial_id: trial_id.to_string(),
                });
            };
            if !trial.is_held_by(worker_id) {
                warn!(
                    trial_id = %trial_id,
                    worker_id,
                    status = ?trial.status,
                    owner = ?trial.assigned_worker,
                    "completion from non-owner rejected"
                );
                return Err(SearchError::NotOwner {
                    trial_id: trial_id.to_string(),
                    worker_id: worker_id.to_string(),
                });
            }

            trial.mark_completed(objective, metrics);
            let values = trial.values.clone();
            let result = trial.result.clone();
            if self.events.is_some() {
                events.push(SearchEvent::Trial(trial.clone()));
            }

            state.store.release(worker_id);
            let session = state.store.session_mut(worker_id);
            session.failure_count = 0;
            session.trials_completed += 1;

            state.strategy.report(&values, objective);
            if let Some(result) = &result {
                if self.config.direction.keep_best(&mut state.best_trial, result) {
                    debug!(trial_id = %trial_id, objective, "new best trial");
                }
            }

            info!(trial_id = %trial_id, worker_id, objective, "trial completed");
            let assignment = self.issue_locked(state, worker_id, &mut events)?;
            self.push_summary(state, &mut events);
            assignment
        };
        self.emit(events);
        Ok(assignment)
    }

    /// Cancel the worker's current trial after a local training failure.
    ///
    /// The trial's budget slot is returned. Once the worker's consecutive
    /// failures reach `max_fails_per_worker` it is evicted for good.
    pub fn cancel_trial(&self, worker_id: &str) -> SearchResult<TrialAssignment> {
        let mut events = Vec::new();
        let assignment = {
            let mut guard = self.state.write();
            let state = &mut *guard;

            let Some(trial_id) = state.store.release(worker_id) else {
                warn!(worker_id, "cancellation without an active trial rejected");
                return Err(SearchError::NoActiveTrial {
                    worker_id: worker_id.to_string(),
                });
            };

            if let Some(trial) = state.store.get_mut(&trial_id) {
                trial.mark_cancelled();
                if self.events.is_some() {
                    events.push(SearchEvent::Trial(trial.clone()));
                }
            }
            state.created_count = state.created_count.saturating_sub(1);

            let session = state.store.session_mut(worker_id);
            session.failure_count += 1;
            let failures = session.failure_count;

            let assignment = if failures >= self.config.max_fails_per_worker {
                session.evicted = true;
                warn!(
                    worker_id,
                    trial_id = %trial_id,
                    failures,
                    "trial cancelled, worker evicted"
                );
                TrialAssignment::Evicted
            } else {
                info!(worker_id, trial_id = %trial_id, failures, "trial cancelled");
                self.issue_locked(state, worker_id, &mut events)?
            };
            self.push_summary(state, &mut events);
            assignment
        };
        self.emit(events);
        Ok(assignment)
    }

    // -- Read-only lookups --------------------------------------------------

    /// Trial currently held by `worker_id`, if any.
    pub fn current_trial(&self, worker_id: &str) -> Option<TrialId> {
        self.state.read().store.current_trial(worker_id)
    }

    pub fn created_count(&self) -> usize {
        self.state.read().created_count
    }

    pub fn session(&self, worker_id: &str) -> Option<WorkerSession> {
        self.state.read().store.session(worker_id).cloned()
    }

    pub fn trial(&self, trial_id: &TrialId) -> Option<Trial> {
        self.state.read().store.get(trial_id).cloned()
    }

    /// All trials in creation order.
    pub fn trials(&self) -> Vec<Trial> {
        self.state.read().store.iter().cloned().collect()
    }

    pub fn summary(&self) -> SearchSummary {
        self.summary_locked(&self.state.read())
    }

    // -- Internals ----------------------------------------------------------

    fn issue_locked(
        &self,
        state: &mut CoordinatorState,
        worker_id: &str,
        events: &mut Vec<SearchEvent>,
    ) -> SearchResult<TrialAssignment> {
        let session = state.store.session_mut(worker_id);
        if session.evicted {
            debug!(worker_id, "evicted worker asked for work");
            return Ok(TrialAssignment::Evicted);
        }

        if let Some(current) = session.current_trial_id {
            if let Some(trial) = state.store.get(&current) {
                debug!(worker_id, trial_id = %current, "worker already holds a trial");
                return Ok(TrialAssignment::Offer(TrialOffer {
                    trial_id: trial.id,
                    values: trial.values.clone(),
                }));
            }
        }

        if state.created_count >= self.config.max_trials {
            info!(
                worker_id,
                created = state.created_count,
                "trial budget exhausted"
            );
            return Ok(TrialAssignment::Exhausted);
        }

        let active = state.store.active_workers();
        if active >= self.config.max_parallel_workers {
            warn!(worker_id, active, "no free parallel slot");
            return Err(SearchError::AdmissionRejected {
                active,
                limit: self.config.max_parallel_workers,
            });
        }

        let values = state.strategy.suggest();
        let trial = Trial::new(state.store.len(), values, worker_id);
        let offer = TrialOffer {
            trial_id: trial.id,
            values: trial.values.clone(),
        };
        if self.events.is_some() {
            events.push(SearchEvent::Trial(trial.clone()));
        }

        state.store.insert(trial);
        state.store.bind(worker_id, offer.trial_id);
        state.created_count += 1;

        info!(
            worker_id,
            trial_id = %offer.trial_id,
            created = state.created_count,
            "trial issued"
        );
        Ok(TrialAssignment::Offer(offer))
    }

    fn summary_locked(&self, state: &CoordinatorState) -> SearchSummary {
        SearchSummary {
            objective: self.config.objective.clone(),
            direction: self.config.direction,
            strategy: state.strategy.name().to_string(),
            max_trials: self.config.max_trials,
            created_count: state.created_count,
            trials_running: state.store.count_by_status(TrialStatus::Running),
            trials_completed: state.store.count_by_status(TrialStatus::Completed),
            trials_cancelled: state.store.count_by_status(TrialStatus::Cancelled),
            active_workers: state.store.active_workers(),
            evicted_workers: state.store.evicted_workers(),
            best_trial: state.best_trial.clone(),
            exhausted: state.created_count >= self.config.max_trials,
        }
    }

    fn push_summary(&self, state: &CoordinatorState, events: &mut Vec<SearchEvent>) {
        if self.events.is_some() {
            events.push(SearchEvent::Summary(self.summary_locked(state)));
        }
    }

    fn emit(&self, events: Vec<SearchEvent>) {
        let Some(sink) = &self.events else {
            return;
        };
        for event in events {
            if sink.send(event).is_err() {
                debug!("event sink disconnected, dropping search events");
                return;
            }
        }
    }
}
