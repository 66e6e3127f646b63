//! Ordered concatenation of per-session output files.

use crate::manifest::TaskManifest;
use std::fs::File;
use std::io::{self};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Errors raised while combining session outputs.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// A file declared in the manifest is missing or unreadable. Reported,
    /// never silently skipped; any bytes already combined are left on disk
    /// for diagnosis.
    #[error("cannot read session output '{path}': {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write combined output '{path}': {source}")]
    Combined {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Concatenates a task's session output files into its combined file.
///
/// Sources come from the manifest's ordered path list - never a directory
/// scan - so combined byte order matches session index order regardless of
/// the order sessions finished in. The operation is a pure ordered copy:
/// re-running it on the same inputs is idempotent, and the session files
/// remain on disk afterwards.
///
/// A manifest whose path list is already just the combined file (a merged
/// sequential launch) is returned as-is.
pub fn combine_session_outputs(manifest: &TaskManifest) -> Result<PathBuf, AggregateError> {
    let dest = manifest.combined_output_path();
    if manifest.dump_avg_balance.len() == 1 && manifest.dump_avg_balance[0] == dest {
        debug!(task_id = %manifest.task_id, "output already combined");
        return Ok(dest);
    }
    debug!(
        task_id = %manifest.task_id,
        sources = manifest.dump_avg_balance.len(),
        "combining session outputs"
    );
    let mut combined = File::create(&dest).map_err(|source| AggregateError::Combined {
        path: dest.clone(),
        source,
    })?;
    for path in &manifest.dump_avg_balance {
        let mut source = File::open(path).map_err(|source| AggregateError::Source {
            path: path.clone(),
            source,
        })?;
        io::copy(&mut source, &mut combined).map_err(|source| AggregateError::Combined {
            path: dest.clone(),
            source,
        })?;
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_VERSION;
    use crate::testing::demo_spec;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn manifest_with_sessions(dir: &Path, contents: &[&str]) -> TaskManifest {
        let mut paths = Vec::new();
        for (i, content) in contents.iter().enumerate() {
            let path = dir.join(format!("T_S{i}_avg_balance.csv"));
            fs::write(&path, content).unwrap();
            paths.push(path);
        }
        TaskManifest {
            version: MANIFEST_VERSION,
            task_id: "T".to_string(),
            session_num: contents.len(),
            session_ids: (0..contents.len()).map(|i| format!("T_S{i}")).collect(),
            market_params: demo_spec(30).build().unwrap(),
            seed: None,
            output_dir: dir.to_path_buf(),
            dump_avg_balance: paths,
            created_at: None,
        }
    }

    #[test]
    fn test_combines_in_manifest_order() {
        let dir = tempdir().unwrap();
        let manifest = manifest_with_sessions(dir.path(), &["0,10\n", "0,20\n", "0,30\n"]);

        let dest = combine_session_outputs(&manifest).unwrap();
        assert_eq!(fs::read_to_string(dest).unwrap(), "0,10\n0,20\n0,30\n");
    }

    #[test]
    fn test_sources_remain_after_combining() {
        let dir = tempdir().unwrap();
        let manifest = manifest_with_sessions(dir.path(), &["a\n", "b\n"]);
        combine_session_outputs(&manifest).unwrap();
        for path in &manifest.dump_avg_balance {
            assert!(path.exists());
        }
    }

    #[test]
    fn test_idempotent() {
        let dir = tempdir().unwrap();
        let manifest = manifest_with_sessions(dir.path(), &["0,1\nx,2\n", "0,3\n"]);

        let first = fs::read(combine_session_outputs(&manifest).unwrap()).unwrap();
        let second = fs::read(combine_session_outputs(&manifest).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_source_is_reported() {
        let dir = tempdir().unwrap();
        let mut manifest = manifest_with_sessions(dir.path(), &["0,1\n"]);
        manifest
            .dump_avg_balance
            .push(dir.path().join("T_S9_avg_balance.csv"));
        manifest.session_num = 2;

        let err = combine_session_outputs(&manifest).unwrap_err();
        assert!(matches!(err, AggregateError::Source { .. }));
        // Partial combined output is left in place for diagnosis.
        assert_eq!(
            fs::read_to_string(manifest.combined_output_path()).unwrap(),
            "0,1\n"
        );
    }

    #[test]
    fn test_already_combined_manifest_is_a_no_op() {
        let dir = tempdir().unwrap();
        let mut manifest = manifest_with_sessions(dir.path(), &[]);
        let combined = manifest.combined_output_path();
        fs::write(&combined, "0,1\n0,2\n").unwrap();
        manifest.dump_avg_balance = vec![combined.clone()];
        manifest.session_num = 2;

        let dest = combine_session_outputs(&manifest).unwrap();
        assert_eq!(dest, combined);
        assert_eq!(fs::read_to_string(&combined).unwrap(), "0,1\n0,2\n");
    }
}
