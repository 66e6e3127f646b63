//! The persisted per-task manifest.
//!
//! One manifest is written per task at launch time, before any session
//! starts, and is never mutated afterwards; a relaunch fully replaces it.
//! It is the sole source of truth for a task's session ids and output file
//! locations - observers resolve files from its path list, never from
//! directory scans.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use simbatch_proto::SessionParams;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Current manifest format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Errors reading or writing a task manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The on-disk manifest was written by a newer Simbatch. Reported as an
    /// explicit format error instead of guessing at the contents.
    #[error("manifest version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}

/// Persisted description of one task: its sessions, parameters, and output
/// file locations.
///
/// Field names follow the version-1 wire format. Unknown fields are ignored
/// on read so newer writers remain readable as long as the version matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskManifest {
    /// Format version; see [`MANIFEST_VERSION`].
    pub version: u32,
    pub task_id: String,
    /// Number of sessions launched for this task.
    pub session_num: usize,
    /// Session identifiers in execution (index) order.
    pub session_ids: Vec<String>,
    /// The simulation parameter set, opaque to the core.
    pub market_params: SessionParams,
    /// Reproducibility seed, when the launch was sequential and seeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub output_dir: PathBuf,
    /// Ordered output file paths: one combined path for a merged sequential
    /// launch, one path per session otherwise. Authoritative - readers must
    /// prefer this list over reconstructing filenames.
    pub dump_avg_balance: Vec<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskManifest {
    /// The manifest path for a task in a given output directory.
    pub fn path_for(output_dir: &Path, task_id: &str) -> PathBuf {
        output_dir.join(format!("{task_id}.json"))
    }

    /// This manifest's own on-disk path.
    pub fn path(&self) -> PathBuf {
        Self::path_for(&self.output_dir, &self.task_id)
    }

    /// The task's combined output file path.
    pub fn combined_output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_avg_balance.csv", self.task_id))
    }

    /// Total progress units this task is expected to produce:
    /// `session_num * endtime`. `None` when the parameter set does not
    /// declare an end time.
    pub fn expected_units(&self) -> Option<u64> {
        self.market_params
            .end_time()
            .map(|end| end * self.session_num as u64)
    }

    /// Writes the manifest to its output directory.
    ///
    /// The write goes to a temporary file in the same directory which is
    /// then renamed over the destination, so a concurrent reader either
    /// sees the previous complete manifest or this one - never a partial
    /// write.
    pub fn persist(&self) -> Result<(), ManifestError> {
        let path = self.path();
        let bytes = serde_json::to_vec(self)?;
        atomic_write(&path, &bytes)?;
        debug!(task_id = %self.task_id, path = %path.display(), "manifest persisted");
        Ok(())
    }

    /// Loads a manifest, enforcing the version guard.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::UnsupportedVersion`] for manifests written
    /// by a newer format version, before attempting a full parse.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read(path)?;
        let value: serde_json::Value = serde_json::from_slice(&content)?;
        let found = value
            .get("version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0) as u32;
        if found > MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found,
                supported: MANIFEST_VERSION,
            });
        }
        Ok(serde_json::from_value(value)?)
    }
}

/// Writes `bytes` to `path` via a temp file and rename, fsyncing both the
/// file and its directory.
fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("manifest");
    let tmp = path.with_file_name(format!(".{name}.{}.tmp", std::process::id()));
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::demo_spec;
    use tempfile::tempdir;

    fn sample_manifest(dir: &Path) -> TaskManifest {
        TaskManifest {
            version: MANIFEST_VERSION,
            task_id: "T".to_string(),
            session_num: 2,
            session_ids: vec!["T_S0".to_string(), "T_S1".to_string()],
            market_params: demo_spec(60).build().unwrap(),
            seed: Some(42),
            output_dir: dir.to_path_buf(),
            dump_avg_balance: vec![
                dir.join("T_S0_avg_balance.csv"),
                dir.join("T_S1_avg_balance.csv"),
            ],
            created_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempdir().unwrap();
        let manifest = sample_manifest(dir.path());
        manifest.persist().unwrap();

        let loaded = TaskManifest::load(&manifest.path()).unwrap();
        assert_eq!(loaded.task_id, "T");
        assert_eq!(loaded.session_num, 2);
        assert_eq!(loaded.session_ids, manifest.session_ids);
        assert_eq!(loaded.dump_avg_balance, manifest.dump_avg_balance);
        assert_eq!(loaded.seed, Some(42));
        assert_eq!(loaded.market_params, manifest.market_params);
    }

    #[test]
    fn test_persist_overwrites_previous_manifest() {
        let dir = tempdir().unwrap();
        let mut manifest = sample_manifest(dir.path());
        manifest.persist().unwrap();

        manifest.session_num = 5;
        manifest.session_ids = (0..5).map(|i| format!("T_S{i}")).collect();
        manifest.persist().unwrap();

        let loaded = TaskManifest::load(&manifest.path()).unwrap();
        assert_eq!(loaded.session_num, 5);
    }

    #[test]
    fn test_newer_version_is_an_explicit_error() {
        let dir = tempdir().unwrap();
        let mut manifest = sample_manifest(dir.path());
        manifest.version = MANIFEST_VERSION + 1;
        manifest.persist().unwrap();

        let err = TaskManifest::load(&manifest.path()).unwrap_err();
        assert!(matches!(
            err,
            ManifestError::UnsupportedVersion { found, supported }
                if found == MANIFEST_VERSION + 1 && supported == MANIFEST_VERSION
        ));
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let dir = tempdir().unwrap();
        let manifest = sample_manifest(dir.path());
        let mut value = serde_json::to_value(&manifest).unwrap();
        value["future_field"] = serde_json::json!({"nested": true});
        fs::write(manifest.path(), serde_json::to_vec(&value).unwrap()).unwrap();

        let loaded = TaskManifest::load(&manifest.path()).unwrap();
        assert_eq!(loaded.task_id, "T");
    }

    #[test]
    fn test_expected_units() {
        let dir = tempdir().unwrap();
        let manifest = sample_manifest(dir.path());
        assert_eq!(manifest.expected_units(), Some(120));
    }

    #[test]
    fn test_missing_manifest_is_io_error() {
        let err = TaskManifest::load(Path::new("/nonexistent/T.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Io(_)));
    }
}
