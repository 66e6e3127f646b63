//! Live progress observation of in-flight runs.
//!
//! The monitor is wholly decoupled from the launching process: it attaches
//! by reading task manifests, then polls the manifests' declared output
//! files. Each poll tail-reads only the last complete line of each growing
//! file and parses its second comma-separated field as the file's progress
//! unit count. A torn write, a transiently absent file, or a line cut off
//! at the tail-chunk boundary is "no new information": the previous value
//! for that file is retained, which together with the engine's
//! non-decreasing units keeps reported progress monotonic.
//!
//! Merged sequential output carries only the in-flight session's units in
//! its tail, so per-session files (pooled or unmerged launches) give the
//! faithful totals.

use crate::manifest::{ManifestError, TaskManifest};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// How many bytes the tail read pulls from the end of a file.
const TAIL_CHUNK: u64 = 8 * 1024;

/// Errors attaching the monitor. Polling itself never errors.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("manifest for task '{0}' does not declare an end time")]
    MissingEndTime(String),

    #[error("cancelled while waiting for manifests")]
    Cancelled,
}

/// One observation of aggregate progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub expected: u64,
}

impl ProgressSnapshot {
    pub fn is_complete(&self) -> bool {
        self.completed >= self.expected
    }
}

/// A tracked output file with its last known progress value.
#[derive(Debug)]
struct WatchedFile {
    path: PathBuf,
    units: u64,
}

impl WatchedFile {
    fn poll(&mut self) {
        if let Some(units) = read_progress(&self.path) {
            self.units = units;
        } else {
            trace!(path = %self.path.display(), "no new progress information");
        }
    }
}

/// Polls the output files of one or more tasks and reports aggregate
/// completion against the expected unit total.
#[derive(Debug)]
pub struct ProgressMonitor {
    files: Vec<WatchedFile>,
    expected: u64,
    interval: Duration,
}

impl ProgressMonitor {
    /// Builds a monitor over already-loaded manifests.
    ///
    /// The expected total is `session_num * endtime` summed over the
    /// manifests; the tracked file set is each manifest's declared path
    /// list.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::MissingEndTime`] when a manifest's parameter
    /// set declares no `endtime`.
    pub fn from_manifests(
        manifests: &[TaskManifest],
        interval: Duration,
    ) -> Result<Self, MonitorError> {
        let mut expected = 0u64;
        let mut files = Vec::new();
        for manifest in manifests {
            expected += manifest
                .expected_units()
                .ok_or_else(|| MonitorError::MissingEndTime(manifest.task_id.clone()))?;
            files.extend(manifest.dump_avg_balance.iter().map(|path| WatchedFile {
                path: path.clone(),
                units: 0,
            }));
        }
        debug!(files = files.len(), expected, "progress monitor attached");
        Ok(Self {
            files,
            expected,
            interval,
        })
    }

    /// Attaches to tasks by id, loading `{task_id}.json` manifests from the
    /// output directory.
    ///
    /// With `wait` set, missing manifests are polled for at the monitor
    /// interval until they all appear or `cancel` is raised - the launcher
    /// persists manifests before any session writes, so a complete manifest
    /// is always what eventually appears. A manifest with a newer format
    /// version is an error regardless of `wait`.
    pub fn attach(
        output_dir: &Path,
        task_ids: &[String],
        interval: Duration,
        wait: bool,
        cancel: &AtomicBool,
    ) -> Result<Self, MonitorError> {
        let paths: Vec<PathBuf> = task_ids
            .iter()
            .map(|id| TaskManifest::path_for(output_dir, id))
            .collect();
        Self::attach_paths(&paths, interval, wait, cancel)
    }

    /// Attaches to explicit manifest paths. See [`ProgressMonitor::attach`].
    pub fn attach_paths(
        manifest_paths: &[PathBuf],
        interval: Duration,
        wait: bool,
        cancel: &AtomicBool,
    ) -> Result<Self, MonitorError> {
        loop {
            match load_all(manifest_paths) {
                Ok(manifests) => return Self::from_manifests(&manifests, interval),
                Err(err) if wait && is_not_found(&err) => {
                    if cancel.load(Ordering::SeqCst) {
                        return Err(MonitorError::Cancelled);
                    }
                    trace!("manifests not all present yet, waiting");
                    std::thread::sleep(interval);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// The expected aggregate unit total.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Reads every tracked file once and returns the aggregate snapshot.
    /// Never errors: unreadable files simply contribute their last known
    /// value.
    pub fn poll(&mut self) -> ProgressSnapshot {
        for file in &mut self.files {
            file.poll();
        }
        ProgressSnapshot {
            completed: self.files.iter().map(|f| f.units).sum(),
            expected: self.expected,
        }
    }

    /// Polls at the configured interval until progress reaches the expected
    /// total or `cancel` is raised, invoking `observer` after every poll.
    /// Returns the final snapshot.
    pub fn watch<F: FnMut(ProgressSnapshot)>(
        &mut self,
        cancel: &AtomicBool,
        mut observer: F,
    ) -> ProgressSnapshot {
        let mut snapshot = self.poll();
        observer(snapshot);
        while !snapshot.is_complete() && !cancel.load(Ordering::SeqCst) {
            std::thread::sleep(self.interval);
            snapshot = self.poll();
            observer(snapshot);
        }
        snapshot
    }
}

fn load_all(paths: &[PathBuf]) -> Result<Vec<TaskManifest>, ManifestError> {
    paths.iter().map(|p| TaskManifest::load(p)).collect()
}

fn is_not_found(err: &ManifestError) -> bool {
    matches!(err, ManifestError::Io(e) if e.kind() == io::ErrorKind::NotFound)
}

/// Reads the current progress units from a file's last complete line.
/// `None` means no new information (absent, empty, torn, or unparseable).
fn read_progress(path: &Path) -> Option<u64> {
    let line = read_last_line(path).ok()??;
    parse_units(&line)
}

/// Parses the second comma-separated field of an output row.
fn parse_units(line: &str) -> Option<u64> {
    line.split(',').nth(1)?.trim().parse().ok()
}

/// Returns the last complete (newline-terminated) line of a file, reading
/// at most [`TAIL_CHUNK`] bytes from the end.
///
/// Bytes after the final newline belong to a row still being written and
/// are ignored. A candidate line that starts exactly at the chunk boundary
/// may have lost its head to the seek, so it is discarded as well.
fn read_last_line(path: &Path) -> io::Result<Option<String>> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(None);
    }
    let start = len.saturating_sub(TAIL_CHUNK);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;

    let Some(end) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok(None);
    };
    let body = &buf[..end];
    let line_start = match body.iter().rposition(|&b| b == b'\n') {
        Some(i) => i + 1,
        None if start > 0 => return Ok(None),
        None => 0,
    };
    Ok(Some(
        String::from_utf8_lossy(&body[line_start..end]).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_VERSION;
    use crate::testing::demo_spec;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::tempdir;

    fn manifest(dir: &Path, task_id: &str, sessions: usize, end_time: u64) -> TaskManifest {
        let session_ids: Vec<String> = (0..sessions).map(|i| format!("{task_id}_S{i}")).collect();
        TaskManifest {
            version: MANIFEST_VERSION,
            task_id: task_id.to_string(),
            session_num: sessions,
            session_ids: session_ids.clone(),
            market_params: demo_spec(end_time).build().unwrap(),
            seed: None,
            output_dir: dir.to_path_buf(),
            dump_avg_balance: session_ids
                .iter()
                .map(|id| dir.join(format!("{id}_avg_balance.csv")))
                .collect(),
            created_at: None,
        }
    }

    #[test]
    fn test_parse_units_takes_second_field() {
        assert_eq!(parse_units("T_S0,42,1.5,9"), Some(42));
        assert_eq!(parse_units("T_S0, 42 ,x"), Some(42));
        assert_eq!(parse_units("no-comma"), None);
        assert_eq!(parse_units("a,b,c"), None);
    }

    #[test]
    fn test_last_line_ignores_torn_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.csv");
        fs::write(&path, "a,1\na,2\na,3").unwrap();
        // The unterminated "a,3" is still being written.
        assert_eq!(read_last_line(&path).unwrap().unwrap(), "a,2");
    }

    #[test]
    fn test_last_line_of_empty_or_single_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.csv");
        fs::write(&path, "").unwrap();
        assert_eq!(read_last_line(&path).unwrap(), None);
        fs::write(&path, "a,1").unwrap();
        assert_eq!(read_last_line(&path).unwrap(), None);
    }

    #[test]
    fn test_monitor_sums_progress_across_files() {
        let dir = tempdir().unwrap();
        let m = manifest(dir.path(), "T", 2, 100);
        fs::write(&m.dump_avg_balance[0], "T_S0,40,x\n").unwrap();
        fs::write(&m.dump_avg_balance[1], "T_S1,25,x\n").unwrap();

        let mut monitor =
            ProgressMonitor::from_manifests(std::slice::from_ref(&m), Duration::from_millis(1))
                .unwrap();
        assert_eq!(monitor.expected(), 200);
        let snap = monitor.poll();
        assert_eq!(snap.completed, 65);
        assert!(!snap.is_complete());
    }

    #[test]
    fn test_missing_files_count_as_zero() {
        let dir = tempdir().unwrap();
        let m = manifest(dir.path(), "T", 2, 10);
        let mut monitor =
            ProgressMonitor::from_manifests(std::slice::from_ref(&m), Duration::from_millis(1))
                .unwrap();
        assert_eq!(monitor.poll().completed, 0);
    }

    #[test]
    fn test_progress_never_decreases_across_a_torn_write() {
        let dir = tempdir().unwrap();
        let m = manifest(dir.path(), "T", 1, 100);
        let path = &m.dump_avg_balance[0];
        let mut monitor =
            ProgressMonitor::from_manifests(std::slice::from_ref(&m), Duration::from_millis(1))
                .unwrap();

        fs::write(path, "T_S0,10,x\n").unwrap();
        assert_eq!(monitor.poll().completed, 10);

        // A torn write: the writer has appended only part of the next row
        // and the previous complete line is garbage mid-overwrite. Recreate
        // the worst case by truncating to an unterminated fragment.
        fs::write(path, "T_S0").unwrap();
        assert_eq!(monitor.poll().completed, 10);

        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        write!(f, ",20,x\nT_S0,30,x\n").unwrap();
        assert_eq!(monitor.poll().completed, 30);
    }

    #[test]
    fn test_expected_total_sums_over_tasks() {
        let dir = tempdir().unwrap();
        let a = manifest(dir.path(), "A", 3, 50);
        let b = manifest(dir.path(), "B", 2, 10);
        let monitor =
            ProgressMonitor::from_manifests(&[a, b], Duration::from_millis(1)).unwrap();
        assert_eq!(monitor.expected(), 170);
    }

    #[test]
    fn test_watch_terminates_when_expected_reached() {
        let dir = tempdir().unwrap();
        let m = manifest(dir.path(), "T", 1, 5);
        fs::write(&m.dump_avg_balance[0], "T_S0,5,x\n").unwrap();
        let mut monitor =
            ProgressMonitor::from_manifests(std::slice::from_ref(&m), Duration::from_millis(1))
                .unwrap();

        let cancel = AtomicBool::new(false);
        let mut observed = Vec::new();
        let last = monitor.watch(&cancel, |s| observed.push(s.completed));
        assert!(last.is_complete());
        assert_eq!(observed.last(), Some(&5));
    }

    #[test]
    fn test_watch_exits_on_cancellation() {
        let dir = tempdir().unwrap();
        let m = manifest(dir.path(), "T", 1, 1_000_000);
        let mut monitor =
            ProgressMonitor::from_manifests(std::slice::from_ref(&m), Duration::from_millis(1))
                .unwrap();

        let cancel = AtomicBool::new(true);
        let last = monitor.watch(&cancel, |_| {});
        assert!(!last.is_complete());
    }

    #[test]
    fn test_attach_fails_fast_when_manifest_missing_and_not_waiting() {
        let dir = tempdir().unwrap();
        let cancel = AtomicBool::new(false);
        let err = ProgressMonitor::attach(
            dir.path(),
            &["T".to_string()],
            Duration::from_millis(1),
            false,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::Manifest(ManifestError::Io(_))));
    }

    #[test]
    fn test_attach_waits_for_manifest_to_appear() {
        let dir = tempdir().unwrap();
        let m = manifest(dir.path(), "T", 1, 10);
        let manifest_path = m.path();

        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            m.persist().unwrap();
        });

        let cancel = AtomicBool::new(false);
        let monitor = ProgressMonitor::attach_paths(
            &[manifest_path],
            Duration::from_millis(5),
            true,
            &cancel,
        )
        .unwrap();
        writer.join().unwrap();
        assert_eq!(monitor.expected(), 10);
    }

    #[test]
    fn test_attach_wait_respects_cancellation() {
        let dir = tempdir().unwrap();
        let cancel = AtomicBool::new(true);
        let err = ProgressMonitor::attach(
            dir.path(),
            &["missing".to_string()],
            Duration::from_millis(1),
            true,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, MonitorError::Cancelled));
    }
}
