//! YAML batch description loaded by `simbatch run`.

use serde::{Deserialize, Serialize};
use simbatch_core::MarketTask;
use simbatch_proto::MarketSessionSpec;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BatchConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("batch declares no tasks")]
    NoTasks,

    #[error("batch declares zero sessions per task")]
    NoSessions,
}

/// Describes one batch: how many tasks, how many sessions each, and the
/// shared market spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Directory receiving manifests and output files for every task.
    pub output_dir: PathBuf,

    /// Task ids are `{task_prefix}_{i}` for `i` in `0..tasks`.
    #[serde(default = "default_task_prefix")]
    pub task_prefix: String,

    #[serde(default = "default_one")]
    pub tasks: usize,

    #[serde(default = "default_one")]
    pub sessions: usize,

    /// Reproducibility seed for sequential and task-granularity runs.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Combine per-session output into one file per task.
    #[serde(default = "default_true")]
    pub merge: bool,

    /// The market session description shared by every task.
    pub spec: MarketSessionSpec,
}

fn default_task_prefix() -> String {
    "Task".to_string()
}

fn default_one() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl BatchConfig {
    /// Loads a batch configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BatchConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading batch configuration");
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validates counts; spec validation happens at launch.
    pub fn validate(&self) -> Result<(), BatchConfigError> {
        if self.tasks == 0 {
            return Err(BatchConfigError::NoTasks);
        }
        if self.sessions == 0 {
            return Err(BatchConfigError::NoSessions);
        }
        Ok(())
    }

    /// Materializes the batch's tasks.
    pub fn build_tasks(&self) -> Vec<MarketTask> {
        (0..self.tasks)
            .map(|i| {
                MarketTask::new(
                    format!("{}_{i}", self.task_prefix),
                    self.spec.clone(),
                    &self.output_dir,
                )
            })
            .collect()
    }

    /// The task ids this batch produces, for attaching a monitor.
    pub fn task_ids(&self) -> Vec<String> {
        (0..self.tasks)
            .map(|i| format!("{}_{i}", self.task_prefix))
            .collect()
    }
}
