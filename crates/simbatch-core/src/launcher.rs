//! Session launching: sequential, pooled, and the batch helpers.
//!
//! Sequential launches run a task's sessions strictly in index order on the
//! calling thread, drawing randomness from one task-scoped rng seeded
//! before the first session - the same seed, session count, and parameters
//! reproduce the output byte for byte. Pooled launches submit every session
//! to the shared [`PoolCoordinator`] for throughput and accept no seed:
//! with execution order unspecified, reproducibility is not on offer, and
//! the options type does not pretend otherwise.
//!
//! Either way the output directory is prepared and the task manifest
//! persisted before the first session writes, so an observer attaching
//! early always sees a complete manifest.

use crate::manifest::{MANIFEST_VERSION, ManifestError, TaskManifest};
use crate::pool::{PoolCoordinator, TaskCompletion, UnitError, WorkUnit};
use crate::task::MarketTask;
use chrono::Utc;
use rand::SeedableRng;
use rand::rngs::StdRng;
use simbatch_proto::{EngineAdapter, EngineError, SessionParams, SpecError};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while launching a task.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid session count: {0} (must be at least 1)")]
    InvalidSessionCount(usize),

    #[error("output path '{0}' exists but is not a directory")]
    OutputDirConflict(PathBuf),

    #[error("invalid market spec: {0}")]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("session '{session_id}' failed: {source}")]
    Session {
        session_id: String,
        #[source]
        source: EngineError,
    },

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Options for a sequential launch.
#[derive(Debug, Clone)]
pub struct SequentialOptions {
    pub sessions: usize,
    /// Seeds the task-scoped rng once, before the first session, making the
    /// whole run reproducible.
    pub seed: Option<u64>,
    /// Stream every session into one combined task file instead of one file
    /// per session.
    pub merge: bool,
}

impl Default for SequentialOptions {
    fn default() -> Self {
        Self {
            sessions: 1,
            seed: None,
            merge: true,
        }
    }
}

/// Options for a pooled launch. There is deliberately no seed field:
/// parallel execution order is unspecified, so seeded reproducibility is
/// not offered in this mode.
#[derive(Debug, Clone)]
pub struct PooledOptions {
    pub sessions: usize,
    /// Combine the per-session files once the last session finishes.
    pub merge: bool,
}

impl Default for PooledOptions {
    fn default() -> Self {
        Self {
            sessions: 1,
            merge: true,
        }
    }
}

impl MarketTask {
    /// Runs this task's sessions sequentially on the calling thread.
    ///
    /// Sessions execute strictly in index order; any session failure aborts
    /// the remaining sessions and propagates with the failing session's id.
    /// Returns the persisted manifest.
    pub fn launch(
        &self,
        engine: &EngineAdapter,
        opts: &SequentialOptions,
    ) -> Result<TaskManifest, LaunchError> {
        if opts.sessions == 0 {
            return Err(LaunchError::InvalidSessionCount(0));
        }
        let params = self.spec.build()?;
        self.prepare_output_dir()?;

        let session_ids = self.session_ids(opts.sessions);
        let output_files: Vec<PathBuf> = if opts.merge {
            vec![self.avg_balance_path(&self.task_id)]
        } else {
            session_ids.iter().map(|id| self.avg_balance_path(id)).collect()
        };
        let manifest = self.build_manifest(&params, &session_ids, &output_files, opts.seed);
        manifest.persist()?;

        let mut rng = match opts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        debug!(task_id = %self.task_id, sessions = opts.sessions, seeded = opts.seed.is_some(), "sequential launch");

        if opts.merge {
            let mut out = BufWriter::new(File::create(&output_files[0])?);
            for session_id in &session_ids {
                self.run_one(engine, session_id, &params, &mut out, &mut rng)?;
            }
            out.flush()?;
        } else {
            for (session_id, path) in session_ids.iter().zip(&output_files) {
                let mut out = BufWriter::new(File::create(path)?);
                self.run_one(engine, session_id, &params, &mut out, &mut rng)?;
                out.flush()?;
            }
        }
        info!(task_id = %self.task_id, sessions = opts.sessions, "task complete");
        Ok(manifest)
    }

    /// Submits this task's sessions to a shared pool, one unit each.
    ///
    /// Fire-and-forget: failures and completion are observed by joining the
    /// pool. Each unit opens its own output file inside the worker, so the
    /// file is closed and flushed whether the session completes or fails.
    /// When merging is requested, the last session to finish triggers the
    /// aggregation step. Returns the persisted manifest.
    pub fn launch_in_pool(
        &self,
        engine: &Arc<EngineAdapter>,
        pool: &mut PoolCoordinator,
        opts: &PooledOptions,
    ) -> Result<TaskManifest, LaunchError> {
        if opts.sessions == 0 {
            return Err(LaunchError::InvalidSessionCount(0));
        }
        let params = self.spec.build()?;
        self.prepare_output_dir()?;

        let session_ids = self.session_ids(opts.sessions);
        let output_files: Vec<PathBuf> = session_ids
            .iter()
            .map(|id| self.avg_balance_path(id))
            .collect();
        let manifest = self.build_manifest(&params, &session_ids, &output_files, None);
        manifest.persist()?;
        debug!(task_id = %self.task_id, sessions = opts.sessions, "pooled launch");

        let completion = Arc::new(TaskCompletion::new(manifest.clone(), opts.merge));
        for (session_id, path) in session_ids.iter().zip(&output_files) {
            let engine = Arc::clone(engine);
            let params = params.clone();
            let dump_dir = self.output_dir.clone();
            let session_id = session_id.clone();
            let path = path.clone();
            pool.submit(WorkUnit::session(
                self.task_id.clone(),
                session_id.clone(),
                Arc::clone(&completion),
                move || run_pooled_session(&engine, &session_id, &params, &path, &dump_dir),
            ));
        }
        Ok(manifest)
    }

    fn run_one(
        &self,
        engine: &EngineAdapter,
        session_id: &str,
        params: &SessionParams,
        out: &mut dyn Write,
        rng: &mut StdRng,
    ) -> Result<(), LaunchError> {
        engine
            .run_session(session_id, params, out, Some(&self.output_dir), rng)
            .map_err(|source| LaunchError::Session {
                session_id: session_id.to_string(),
                source,
            })
    }

    fn build_manifest(
        &self,
        params: &SessionParams,
        session_ids: &[String],
        output_files: &[PathBuf],
        seed: Option<u64>,
    ) -> TaskManifest {
        TaskManifest {
            version: MANIFEST_VERSION,
            task_id: self.task_id.clone(),
            session_num: session_ids.len(),
            session_ids: session_ids.to_vec(),
            market_params: params.clone(),
            seed,
            output_dir: self.output_dir.clone(),
            dump_avg_balance: output_files.to_vec(),
            created_at: Some(Utc::now()),
        }
    }
}

/// Body of one pooled session unit: open the session's own file, run the
/// engine with per-session entropy, flush.
fn run_pooled_session(
    engine: &EngineAdapter,
    session_id: &str,
    params: &SessionParams,
    path: &Path,
    dump_dir: &Path,
) -> Result<(), UnitError> {
    let file = File::create(path).map_err(EngineError::from)?;
    let mut out = BufWriter::new(file);
    let mut rng = StdRng::from_entropy();
    engine.run_session(session_id, params, &mut out, Some(dump_dir), &mut rng)?;
    out.flush().map_err(EngineError::from)?;
    Ok(())
}

/// Runs every session of every task through one shared pool, at session
/// granularity.
///
/// All tasks are validated and their manifests persisted before the first
/// submission; a configuration error in any task means no session of any
/// task starts. The pool is owned by the caller so a cancellation signal
/// can be wired to it before the batch begins.
pub async fn launch_batch_sessions(
    engine: &Arc<EngineAdapter>,
    tasks: &[MarketTask],
    opts: &PooledOptions,
    pool: &mut PoolCoordinator,
) -> Result<crate::pool::BatchReport, LaunchError> {
    if opts.sessions == 0 {
        return Err(LaunchError::InvalidSessionCount(0));
    }
    // Fail fast on any invalid spec before touching the filesystem.
    for task in tasks {
        task.spec.build()?;
    }
    for task in tasks {
        task.launch_in_pool(engine, pool, opts)?;
    }
    info!(
        tasks = tasks.len(),
        sessions_per_task = opts.sessions,
        workers = pool.workers(),
        "batch submitted"
    );
    Ok(pool.join().await)
}

/// Runs whole tasks as pool units: parallel across tasks, sequential (and
/// seed-reproducible) within each task.
///
/// Every task unit owns its own rng seeded from `opts.seed`, so tasks do
/// not interfere with one another's random streams regardless of
/// scheduling.
pub async fn launch_batch_tasks(
    engine: &Arc<EngineAdapter>,
    tasks: &[MarketTask],
    opts: &SequentialOptions,
    pool: &mut PoolCoordinator,
) -> Result<crate::pool::BatchReport, LaunchError> {
    if opts.sessions == 0 {
        return Err(LaunchError::InvalidSessionCount(0));
    }
    for task in tasks {
        task.spec.build()?;
    }
    for task in tasks {
        let engine = Arc::clone(engine);
        let task = task.clone();
        let opts = opts.clone();
        pool.submit(WorkUnit::task(task.task_id.clone(), move || {
            task.launch(&engine, &opts).map(|_| ()).map_err(UnitError::from)
        }));
    }
    info!(
        tasks = tasks.len(),
        sessions_per_task = opts.sessions,
        workers = pool.workers(),
        "task batch submitted"
    );
    Ok(pool.join().await)
}
