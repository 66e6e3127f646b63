//! # simbatch-proto
//!
//! Shared types, error definitions, and the engine contract for Simbatch.
//!
//! This crate provides the foundational abstractions used across all
//! Simbatch crates, including:
//! - The `MarketEngine` trait and the `EngineAdapter` that validates and
//!   invokes it
//! - Market-session parameter builders (`MarketSessionSpec` and friends)
//! - Common error types

mod engine;
mod error;
mod spec;

pub use engine::{EngineAdapter, EngineInfo, MarketEngine, SessionRun};
pub use error::EngineError;
pub use spec::{
    MarketSessionSpec, OrderSchedule, OrderStrategy, PriceRange, SessionParams, SpecError,
    StepMode, TimeMode, Trader, TraderSpec,
};
