//! The engine calling contract and the adapter that enforces it.
//!
//! The simulation engine is an external collaborator: a synchronous callable
//! that runs one market session and streams result rows to a writer. The
//! core never looks inside it; everything it needs to know is captured by
//! [`MarketEngine`] and validated once by [`EngineAdapter::new`].

use crate::error::EngineError;
use crate::spec::SessionParams;
use rand::RngCore;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Static description an engine gives about itself.
///
/// `accepts_dump_dir` is the contract check: an engine that cannot receive
/// the output-directory argument is a configuration error, reported before
/// any session runs rather than mid-batch.
#[derive(Debug, Clone)]
pub struct EngineInfo {
    /// Human-readable engine name, used in error messages and logs.
    pub name: String,
    /// Whether the engine accepts a dump directory for auxiliary output.
    pub accepts_dump_dir: bool,
}

impl EngineInfo {
    /// Creates an info record for an engine that accepts a dump directory.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accepts_dump_dir: true,
        }
    }
}

/// The normalized argument set for one session run.
///
/// The engine writes one result row at a time to `output`; each row is a
/// comma-separated line whose second field carries the non-decreasing
/// progress unit. `rng` is the session's random source: task-scoped and
/// seeded once in sequential mode, per-session entropy in pooled mode.
pub struct SessionRun<'a> {
    /// Unique session identifier, e.g. `"T_S04"`.
    pub session_id: &'a str,
    /// Destination for result rows. Exclusively owned by this session.
    pub output: &'a mut dyn Write,
    /// Directory for any auxiliary dump files the engine produces.
    pub dump_dir: Option<&'a Path>,
    /// The full simulation parameter set, opaque to the launcher.
    pub params: &'a SessionParams,
    /// Random source for this run.
    pub rng: &'a mut dyn RngCore,
}

/// The external simulation engine.
///
/// Implementations run exactly one session per `run_session` call,
/// synchronously, and propagate their own failures unchanged.
pub trait MarketEngine: Send + Sync {
    /// Describes the engine for contract validation.
    fn info(&self) -> EngineInfo;

    /// Runs one market session to completion.
    fn run_session(&self, run: SessionRun<'_>) -> Result<(), EngineError>;
}

/// Validated handle to a [`MarketEngine`].
///
/// Construction performs the contract check; afterwards the adapter invokes
/// the engine exactly once per call with the normalized argument set. It
/// performs no retries and has no side effects of its own.
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn MarketEngine>,
    name: String,
}

impl EngineAdapter {
    /// Wraps an engine, validating its contract.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MissingDumpDir`] if the engine does not
    /// declare support for the output-directory argument.
    pub fn new(engine: Arc<dyn MarketEngine>) -> Result<Self, EngineError> {
        let info = engine.info();
        if !info.accepts_dump_dir {
            return Err(EngineError::MissingDumpDir { engine: info.name });
        }
        Ok(Self {
            engine,
            name: info.name,
        })
    }

    /// Returns the engine's declared name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invokes the engine for one session.
    pub fn run_session(
        &self,
        session_id: &str,
        params: &SessionParams,
        output: &mut dyn Write,
        dump_dir: Option<&Path>,
        rng: &mut dyn RngCore,
    ) -> Result<(), EngineError> {
        self.engine.run_session(SessionRun {
            session_id,
            output,
            dump_dir,
            params,
            rng,
        })
    }
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
