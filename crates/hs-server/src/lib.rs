//! # hs-server
//!
//! HTTP boundary for a HyperSweep search. Workers poll these endpoints; all
//! state lives in the shared [`hs_optimizer::SearchCoordinator`].

pub mod service;
pub mod shutdown;

pub use service::{ApiError, CoordinatorService};
pub use shutdown::finish_export;
