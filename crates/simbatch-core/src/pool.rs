//! The shared bounded worker pool.
//!
//! One [`PoolCoordinator`] serves every task in a batch. Each submitted
//! unit of work runs the synchronous engine on a blocking thread, gated by
//! a semaphore sized to the worker count. Per-task completion is an atomic
//! counter: the unit that observes the final count triggers output
//! aggregation exactly once. Failures travel over an error channel with
//! task and session context and never cancel sibling units.

use crate::aggregate::{self, AggregateError};
use crate::launcher::LaunchError;
use crate::manifest::TaskManifest;
use simbatch_proto::EngineError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use thiserror::Error;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Why one unit of work failed.
#[derive(Debug, Error)]
pub enum UnitError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),

    /// A whole-task unit failed (task-granularity batches).
    #[error(transparent)]
    Launch(Box<LaunchError>),

    /// The worker thread panicked.
    #[error("worker panicked: {0}")]
    Panic(String),
}

/// A failure report surfaced on the pool's error channel.
///
/// Carries enough context to locate the failing run without halting
/// unrelated sessions.
#[derive(Debug)]
pub struct UnitFailure {
    pub task_id: String,
    /// Absent for whole-task units and for aggregation failures.
    pub session_id: Option<String>,
    pub error: UnitError,
}

/// Outcome of draining a pool.
#[derive(Debug)]
pub struct BatchReport {
    pub failures: Vec<UnitFailure>,
    /// Whether the batch was cancelled before all units were dispatched.
    /// Cancellation is not a failure; no error is synthesized for it.
    pub cancelled: bool,
}

impl BatchReport {
    /// True when every dispatched unit completed and nothing was cancelled.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Tracks how many of a task's sessions have completed, and triggers the
/// aggregation step when the last one lands.
///
/// The counter is atomic: exactly one completion observes the transition to
/// the total, which makes the happens-before between "last session
/// finished" and "aggregation starts" explicit.
#[derive(Debug)]
pub struct TaskCompletion {
    manifest: TaskManifest,
    merge: bool,
    completed: AtomicUsize,
}

impl TaskCompletion {
    pub fn new(manifest: TaskManifest, merge: bool) -> Self {
        Self {
            manifest,
            merge,
            completed: AtomicUsize::new(0),
        }
    }

    /// Records one successful session; returns true when this was the last
    /// session of a merging task (the caller then runs aggregation).
    fn record_success(&self) -> bool {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        done == self.manifest.session_num && self.merge
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn manifest(&self) -> &TaskManifest {
        &self.manifest
    }
}

/// One unit of work: a session, or a whole task in task-granularity
/// batches.
pub struct WorkUnit {
    pub task_id: String,
    pub session_id: Option<String>,
    /// Completion tracker; present only for session units of merging tasks.
    pub completion: Option<Arc<TaskCompletion>>,
    pub work: Box<dyn FnOnce() -> Result<(), UnitError> + Send + 'static>,
}

impl WorkUnit {
    /// A session-granularity unit.
    pub fn session(
        task_id: impl Into<String>,
        session_id: impl Into<String>,
        completion: Arc<TaskCompletion>,
        work: impl FnOnce() -> Result<(), UnitError> + Send + 'static,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: Some(session_id.into()),
            completion: Some(completion),
            work: Box::new(work),
        }
    }

    /// A whole-task unit.
    pub fn task(
        task_id: impl Into<String>,
        work: impl FnOnce() -> Result<(), UnitError> + Send + 'static,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            session_id: None,
            completion: None,
            work: Box::new(work),
        }
    }
}

/// Owns the bounded worker pool shared across all tasks in a batch.
pub struct PoolCoordinator {
    permits: Arc<Semaphore>,
    cancel: Arc<AtomicBool>,
    units: JoinSet<()>,
    failure_tx: mpsc::UnboundedSender<UnitFailure>,
    failure_rx: mpsc::UnboundedReceiver<UnitFailure>,
    workers: usize,
}

impl PoolCoordinator {
    /// Creates a pool with a fixed worker count (minimum 1).
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        debug!(workers, "worker pool created");
        Self {
            permits: Arc::new(Semaphore::new(workers)),
            cancel: Arc::new(AtomicBool::new(false)),
            units: JoinSet::new(),
            failure_tx,
            failure_rx,
            workers,
        }
    }

    /// Default pool size: `min(pending_units, max(1, available_parallelism - 1))`.
    pub fn default_workers(pending_units: usize) -> usize {
        let available = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        pending_units.min(available.saturating_sub(1).max(1)).max(1)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Requests cooperative cancellation: no new submissions are accepted
    /// and queued-but-unstarted units are skipped. Units already running
    /// finish or fail on their own.
    pub fn cancel(&self) {
        info!("pool cancellation requested");
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// A handle to the cancellation flag, for wiring to a signal handler.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Submits one unit of work. Fire-and-forget: completion and failure
    /// are observed through [`PoolCoordinator::join`].
    pub fn submit(&mut self, unit: WorkUnit) {
        if self.is_cancelled() {
            debug!(task_id = %unit.task_id, "dropping submission after cancellation");
            return;
        }
        let permits = Arc::clone(&self.permits);
        let cancel = Arc::clone(&self.cancel);
        let failure_tx = self.failure_tx.clone();
        self.units.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            if cancel.load(Ordering::SeqCst) {
                debug!(task_id = %unit.task_id, "skipping queued unit after cancellation");
                return;
            }
            let WorkUnit {
                task_id,
                session_id,
                completion,
                work,
            } = unit;
            match tokio::task::spawn_blocking(work).await {
                Ok(Ok(())) => {
                    if let Some(completion) = completion
                        && completion.record_success()
                    {
                        finish_task(completion, &task_id, &failure_tx).await;
                    }
                }
                Ok(Err(error)) => {
                    warn!(
                        task_id = %task_id,
                        session_id = session_id.as_deref().unwrap_or("-"),
                        error = %error,
                        "unit of work failed"
                    );
                    let _ = failure_tx.send(UnitFailure {
                        task_id,
                        session_id,
                        error,
                    });
                }
                Err(join_err) => {
                    let _ = failure_tx.send(UnitFailure {
                        task_id,
                        session_id,
                        error: UnitError::Panic(join_err.to_string()),
                    });
                }
            }
        });
    }

    /// Waits for every submitted unit to finish and collects the failure
    /// reports.
    pub async fn join(&mut self) -> BatchReport {
        while self.units.join_next().await.is_some() {}
        let mut failures = Vec::new();
        while let Ok(failure) = self.failure_rx.try_recv() {
            failures.push(failure);
        }
        BatchReport {
            failures,
            cancelled: self.is_cancelled(),
        }
    }
}

/// Runs the aggregation step for a task whose last session just completed.
async fn finish_task(
    completion: Arc<TaskCompletion>,
    task_id: &str,
    failure_tx: &mpsc::UnboundedSender<UnitFailure>,
) {
    debug!(task_id, "last session complete, combining outputs");
    let result = tokio::task::spawn_blocking({
        let completion = Arc::clone(&completion);
        move || aggregate::combine_session_outputs(completion.manifest())
    })
    .await;
    match result {
        Ok(Ok(path)) => {
            info!(task_id, path = %path.display(), "combined output written");
        }
        Ok(Err(error)) => {
            let _ = failure_tx.send(UnitFailure {
                task_id: task_id.to_string(),
                session_id: None,
                error: UnitError::Aggregate(error),
            });
        }
        Err(join_err) => {
            let _ = failure_tx.send(UnitFailure {
                task_id: task_id.to_string(),
                session_id: None,
                error: UnitError::Panic(join_err.to_string()),
            });
        }
    }
}

impl From<LaunchError> for UnitError {
    fn from(err: LaunchError) -> Self {
        UnitError::Launch(Box::new(err))
    }
}
