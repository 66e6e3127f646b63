//! Built-in demo engine.
//!
//! A random-walk stand-in for a real market simulator, so `simbatch run`
//! exercises the full launch/aggregate/monitor stack out of the box. One
//! row is written per session time unit: session id, time (the progress
//! unit), cumulative trade count, and the walked average balance. All
//! randomness comes from the rng the launcher provides, so seeded
//! sequential runs reproduce exactly.

use rand::Rng;
use simbatch_proto::{EngineError, EngineInfo, MarketEngine, SessionRun};
use std::io::Write;

const STARTING_BALANCE: f64 = 100.0;

pub struct RandomWalkEngine;

impl MarketEngine for RandomWalkEngine {
    fn info(&self) -> EngineInfo {
        EngineInfo::new("random-walk")
    }

    fn run_session(&self, run: SessionRun<'_>) -> Result<(), EngineError> {
        let start = run.params.start_time().unwrap_or(0);
        let end = run
            .params
            .end_time()
            .ok_or_else(|| EngineError::engine("market spec declares no end time"))?;

        let mut balance = STARTING_BALANCE;
        let mut trades: u64 = 0;
        for t in (start + 1)..=end {
            balance += run.rng.gen_range(-1.0..1.0);
            if run.rng.gen_bool(0.3) {
                trades += 1;
            }
            writeln!(
                run.output,
                "{},{},{},{:.2}",
                run.session_id, t, trades, balance
            )?;
        }
        Ok(())
    }
}
