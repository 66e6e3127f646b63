//! # simbatch-core
//!
//! Core batch-execution functionality for Simbatch.
//!
//! This crate provides:
//! - The task launcher with its two execution strategies (sequential,
//!   pooled) and the batch helpers built on top of them
//! - The shared bounded worker pool coordinating sessions across tasks
//! - The persisted per-task manifest
//! - Ordered aggregation of per-session output files
//! - The progress monitor that tails growing output files

mod aggregate;
mod launcher;
mod manifest;
mod pool;
mod progress;
mod task;
pub mod testing;

pub use aggregate::{AggregateError, combine_session_outputs};
pub use launcher::{
    LaunchError, PooledOptions, SequentialOptions, launch_batch_sessions, launch_batch_tasks,
};
pub use manifest::{MANIFEST_VERSION, ManifestError, TaskManifest};
pub use pool::{BatchReport, PoolCoordinator, TaskCompletion, UnitError, UnitFailure, WorkUnit};
pub use progress::{MonitorError, ProgressMonitor, ProgressSnapshot};
pub use task::MarketTask;
