//! Incremental synchronization between the transactional, document, graph and warehouse
//! stores of the wristband platform.
//!
//! A run is a fixed sequence of [`pipeline::Phase`]s. Dimension and fact loads re-enter
//! from watermarks recomputed out of the warehouse; graph relationships are reconciled
//! from the raw sensor evidence on every run.

pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod nodes;
pub mod pipeline;
pub mod reference;
pub mod relations;
pub mod report;
pub mod watermark;

pub use error::{Result, SyncError};
pub use pipeline::{Phase, PhaseOutcome, Pipeline, SyncStores};
