//! # hs-worker
//!
//! Client side of a HyperSweep search. A [`WorkerClient`] pulls trials from a
//! coordinator, runs a [`Trainable`] on each and reports the metrics back.
//!
//! Trainables are resolved from a reference string through a
//! [`TrainableRegistry`], or wrap an external program with
//! [`CommandTrainable`]. Local training arguments are declared up front in a
//! [`TrainingSchema`].

pub mod client;
pub mod errors;
pub mod kwargs;
pub mod resolve;
pub mod trainable;
pub mod transport;

pub use client::{LocalArgs, WorkerClient};
pub use errors::{
    KwargsError, ResolutionError, TrainingError, TransportError, WorkerError, WorkerResult,
};
pub use kwargs::{expand_placeholders, ParamKind, ParamSpec, TrainingSchema};
pub use resolve::TrainableRegistry;
pub use trainable::{
    CommandTrainable, FnTrainable, Kwargs, Metrics, Trainable, TrialContext, TRIAL_ID_ENV,
    WORKER_ID_ENV,
};
pub use transport::{CoordinatorApi, HttpCoordinator, LocalCoordinator};
