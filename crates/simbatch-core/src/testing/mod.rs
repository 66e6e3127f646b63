//! Test doubles for exercising the launcher without a real simulation
//! engine.
//!
//! [`StubEngine`] writes one row per session time unit, drawing its value
//! column from the random source it is handed - which makes seeded
//! sequential runs byte-reproducible, exactly like a real engine that uses
//! its rng for every trading decision. Individual sessions can be told to
//! fail or to stall, so tests can drive error paths and completion
//! ordering.

use rand::RngCore;
use simbatch_proto::{
    EngineError, EngineInfo, MarketEngine, MarketSessionSpec, OrderSchedule, OrderStrategy,
    PriceRange, SessionRun, StepMode, TimeMode, Trader, TraderSpec,
};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::time::Duration;

/// A minimal valid market spec with the given end time.
pub fn demo_spec(end_time: u64) -> MarketSessionSpec {
    MarketSessionSpec::with_symmetric_traders(
        (0, end_time),
        vec![TraderSpec::new(Trader::ZIP, 5), TraderSpec::new(Trader::ZIC, 5)],
        OrderSchedule::symmetric(
            vec![OrderStrategy::new(
                (0, end_time),
                vec![PriceRange::new(80, 320)],
                StepMode::Fixed,
            )],
            30,
            TimeMode::Periodic,
        ),
    )
}

/// A scripted engine for tests.
pub struct StubEngine {
    name: String,
    accepts_dump_dir: bool,
    fail_sessions: HashSet<String>,
    delays: HashMap<String, Duration>,
}

impl StubEngine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accepts_dump_dir: true,
            fail_sessions: HashSet::new(),
            delays: HashMap::new(),
        }
    }

    /// An engine that does not declare dump-dir support, for exercising the
    /// adapter's contract check.
    pub fn without_dump_dir(mut self) -> Self {
        self.accepts_dump_dir = false;
        self
    }

    /// Makes the named session fail.
    pub fn failing_on(mut self, session_id: impl Into<String>) -> Self {
        self.fail_sessions.insert(session_id.into());
        self
    }

    /// Makes the named session sleep before writing, to force a completion
    /// order in pooled runs.
    pub fn delaying(mut self, session_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(session_id.into(), delay);
        self
    }
}

impl MarketEngine for StubEngine {
    fn info(&self) -> EngineInfo {
        EngineInfo {
            name: self.name.clone(),
            accepts_dump_dir: self.accepts_dump_dir,
        }
    }

    fn run_session(&self, run: SessionRun<'_>) -> Result<(), EngineError> {
        if let Some(delay) = self.delays.get(run.session_id) {
            std::thread::sleep(*delay);
        }
        if self.fail_sessions.contains(run.session_id) {
            return Err(EngineError::engine(format!(
                "scripted failure in session '{}'",
                run.session_id
            )));
        }
        let start = run.params.start_time().unwrap_or(0);
        let end = run.params.end_time().unwrap_or(0);
        for t in (start + 1)..=end {
            writeln!(run.output, "{},{},{}", run.session_id, t, run.rng.next_u32())?;
        }
        Ok(())
    }
}
