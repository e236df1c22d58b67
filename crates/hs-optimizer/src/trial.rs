//! Trial records, search configuration and run summaries.

use chrono::{DateTime, Utc};
use hs_types::{config_error, ParameterSet, SearchResult, TrialId, WORKER_ID_PARAM};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Minimize
    }
}

impl ObjectiveDirection {
    /// True when `candidate` beats `incumbent` in this direction.
    pub fn improves(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Maximize => candidate > incumbent,
            Self::Minimize => candidate < incumbent,
        }
    }

    /// Replace `best` with `candidate` if it is the first result or improves
    /// on the current best. Returns whether `best` changed.
    pub fn keep_best(&self, best: &mut Option<TrialResult>, candidate: &TrialResult) -> bool {
        let improved = match best {
            None => true,
            Some(current) => self.improves(candidate.objective, current.objective),
        };
        if improved {
            *best = Some(candidate.clone());
        }
        improved
    }
}

/// Top-level configuration for a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Metric name workers report (e.g. "val_loss").
    pub objective: String,

    /// Direction of optimization.
    pub direction: ObjectiveDirection,

    /// Global cap on trials created; cancelled trials give their slot back.
    pub max_trials: usize,

    /// How many workers may hold a trial at the same time.
    pub max_parallel_workers: usize,

    /// Consecutive failures after which a worker is evicted.
    pub max_fails_per_worker: u32,

    /// Seed for the sampling strategy; `None` draws from OS entropy.
    pub seed: Option<u64>,

    /// Directory under which `project_name/` is created for result export.
    pub output_dir: Option<PathBuf>,

    pub project_name: String,
}

impl SearchConfig {
    pub fn new(objective: &str, max_trials: usize) -> Self {
        Self {
            objective: objective.to_string(),
            direction: ObjectiveDirection::Minimize,
            max_trials,
            max_parallel_workers: 1,
            max_fails_per_worker: 5,
            seed: None,
            output_dir: None,
            project_name: "hypersweep".to_string(),
        }
    }

    pub fn with_parallel_workers(mut self, n: usize) -> Self {
        self.max_parallel_workers = n;
        self
    }

    pub fn with_max_fails(mut self, n: u32) -> Self {
        self.max_fails_per_worker = n;
        self
    }

    pub fn with_direction(mut self, direction: ObjectiveDirection) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_export(mut self, output_dir: impl Into<PathBuf>, project_name: &str) -> Self {
        self.output_dir = Some(output_dir.into());
        self.project_name = project_name.to_string();
        self
    }

    /// Directory results are written to, if export is enabled.
    pub fn project_dir(&self) -> Option<PathBuf> {
        self.output_dir
            .as_ref()
            .map(|dir| dir.join(&self.project_name))
    }

    pub fn validate(&self) -> SearchResult<()> {
        if self.objective.trim().is_empty() {
            return Err(config_error!("objective name must not be empty"));
        }
        if self.objective == WORKER_ID_PARAM {
            return Err(config_error!("objective cannot be named `{WORKER_ID_PARAM}`"));
        }
        if self.max_trials == 0 {
            return Err(config_error!("max_trials must be at least 1"));
        }
        if self.max_parallel_workers == 0 {
            return Err(config_error!("max_parallel_workers must be at least 1"));
        }
        if self.max_fails_per_worker == 0 {
            return Err(config_error!("max_fails_per_worker must be at least 1"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrialStatus {
    Running,
    Completed,
    Cancelled,
}

impl TrialStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One sampled configuration and its outcome.
///
/// Trials are never deleted; terminal ones stay in the store as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: TrialId,
    /// Creation sequence number (0-indexed), including cancelled trials.
    pub trial_number: usize,
    pub values: ParameterSet,
    pub status: TrialStatus,
    pub assigned_worker: Option<String>,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trial {
    /// A fresh trial, already running on `worker_id`.
    pub fn new(trial_number: usize, values: ParameterSet, worker_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            trial_number,
            values,
            status: TrialStatus::Running,
            assigned_worker: Some(worker_id.to_string()),
            result: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.status == TrialStatus::Running && self.assigned_worker.as_deref() == Some(worker_id)
    }

    pub fn mark_completed(&mut self, objective: f64, metrics: HashMap<String, f64>) {
        let finished_at = Utc::now();
        let duration = (finished_at - self.created_at).num_seconds();
        self.result = Some(TrialResult {
            trial_id: self.id,
            objective,
            metrics,
            parameters: self.values.clone(),
            duration_seconds: u64::try_from(duration).ok(),
        });
        self.status = TrialStatus::Completed;
        self.assigned_worker = None;
        self.finished_at = Some(finished_at);
    }

    pub fn mark_cancelled(&mut self) {
        self.status = TrialStatus::Cancelled;
        self.assigned_worker = None;
        self.finished_at = Some(Utc::now());
    }
}

/// Result of a completed trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: TrialId,
    pub objective: f64,
    /// Every other metric the worker reported alongside the objective.
    pub metrics: HashMap<String, f64>,
    pub parameters: ParameterSet,
    pub duration_seconds: Option<u64>,
}

/// Point-in-time view of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub objective: String,
    pub direction: ObjectiveDirection,
    pub strategy: String,
    pub max_trials: usize,
    pub created_count: usize,
    pub trials_running: usize,
    pub trials_completed: usize,
    pub trials_cancelled: usize,
    pub active_workers: usize,
    pub evicted_workers: Vec<String>,
    pub best_trial: Option<TrialResult>,
    /// No further trials will be created.
    pub exhausted: bool,
}
