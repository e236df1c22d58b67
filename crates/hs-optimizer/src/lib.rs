//! # hs-optimizer
//!
//! Hyperparameter spaces, trial tracking and the concurrent search coordinator
//! for HyperSweep.
//!
//! The [`SearchCoordinator`] owns the [`TrialStore`] and decides who may run
//! what: admission under a parallelism cap, one outstanding trial per worker,
//! a global trial budget and per-worker failure eviction.

mod coordinator;
mod export;
mod search;
mod store;
mod trial;

pub use coordinator::{SearchCoordinator, TrialAssignment};
pub use export::{spawn_exporter, SearchEvent, TrialExporter};
pub use search::{
    HyperparameterSpace, ParameterDef, ParameterKind, RandomSearch, SearchStrategy,
};
pub use store::{TrialStore, WorkerSession};
pub use trial::{
    ObjectiveDirection, SearchConfig, SearchSummary, Trial, TrialResult, TrialStatus,
};
