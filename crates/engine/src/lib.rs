#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Coordinator engine for `rollcall` (worker roster, artifact
//! distribution, frame scheduling, result aggregation).

/// Public API for the coordinator engine.
pub mod api;

mod batch;
mod driver;
mod registry;
mod results;
mod scheduler;
mod setup;

pub use api::{
    BatchReport, BatchStatus, CoordinatorHandle, DispatchEvent, ProcessingMode, ServerConfig,
    start_coordinator,
};
