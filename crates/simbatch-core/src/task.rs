//! Task identity and output layout.

use crate::launcher::LaunchError;
use simbatch_proto::MarketSessionSpec;
use std::fs;
use std::path::PathBuf;

/// A named group of sessions sharing one parameter set and output
/// directory.
///
/// A task is constructed by the caller and immutable once a launch begins;
/// session count, seed, and the merge flag arrive with the launch call and
/// are frozen into the persisted manifest.
#[derive(Debug, Clone)]
pub struct MarketTask {
    pub task_id: String,
    pub spec: MarketSessionSpec,
    pub output_dir: PathBuf,
}

impl MarketTask {
    pub fn new(
        task_id: impl Into<String>,
        spec: MarketSessionSpec,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            spec,
            output_dir: output_dir.into(),
        }
    }

    /// Derives the task's session identifiers for a given session count.
    ///
    /// Indices are zero-padded to the width of `session_num - 1` so the ids
    /// sort lexicographically in execution order: `T_S0..T_S4` for five
    /// sessions, `T_S00..T_S11` for twelve.
    pub fn session_ids(&self, session_num: usize) -> Vec<String> {
        let width = (session_num.saturating_sub(1)).to_string().len();
        (0..session_num)
            .map(|i| format!("{}_S{i:0width$}", self.task_id))
            .collect()
    }

    /// The output file path for a session id or for the task itself.
    pub(crate) fn avg_balance_path(&self, prefix: &str) -> PathBuf {
        self.output_dir.join(format!("{prefix}_avg_balance.csv"))
    }

    /// Creates the output directory if absent.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::OutputDirConflict`] when a non-directory file
    /// already occupies the path.
    pub(crate) fn prepare_output_dir(&self) -> Result<(), LaunchError> {
        if !self.output_dir.exists() {
            fs::create_dir_all(&self.output_dir)?;
        } else if !self.output_dir.is_dir() {
            return Err(LaunchError::OutputDirConflict(self.output_dir.clone()));
        }
        Ok(())
    }
}
