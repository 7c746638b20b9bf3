//! Checkpoint persistence and the in-progress job catalog.

use crate::assemble::temp_path_for;
use crate::error::DownloadError;
use crate::probe::file_name_from_url;
use crate::types::Range;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Schema version written by this build.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Suffix of checkpoint files in the job directory.
pub const STATUS_SUFFIX: &str = ".status";

fn first_version() -> u32 {
    1
}

/// Persisted snapshot of a resumable job.
///
/// Only the defining fields and range bounds are stored; per-attempt errors
/// and retry counts are not. Unknown fields are ignored on load.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Schema version. Files without one are version 1.
    #[serde(default = "first_version")]
    pub version: u32,
    /// Source URL.
    pub url: String,
    /// Final file name inside the job directory.
    pub file_name: String,
    /// Number of ranges the job was originally planned with.
    pub part_count: usize,
    /// Total length of the resource in bytes.
    pub length: u64,
    /// Configured range size in bytes.
    pub range_size: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Ranges in plan order; exhausted ones have `start > end`.
    pub ranges: Vec<Range>,
}

impl Checkpoint {
    /// Bytes not yet transferred across all ranges.
    pub fn remaining_bytes(&self) -> u64 {
        self.ranges.iter().filter_map(Range::remaining).sum()
    }
}

#[derive(Deserialize)]
struct VersionProbe {
    #[serde(default = "first_version")]
    version: u32,
}

/// Reads and writes the checkpoint of one job.
///
/// Saves are serialized by a mutex and written through a `.part` file that is
/// renamed over the checkpoint, so readers never see a torn file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StateStore {
    /// Store for job `name` in `dir` (`<dir>/<name>.status`).
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: checkpoint_path(dir, name),
            lock: Mutex::new(()),
        }
    }

    /// Location of the checkpoint file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Takes a snapshot with `snapshot` and writes it.
    ///
    /// The snapshot is taken while holding the store lock so a later snapshot
    /// can never be overwritten by an earlier one.
    pub async fn save<F>(&self, snapshot: F) -> Result<(), DownloadError>
    where
        F: FnOnce() -> Checkpoint,
    {
        let _guard = self.lock.lock().await;
        let checkpoint = snapshot();
        let json = serde_json::to_vec_pretty(&checkpoint)?;

        let part = part_path(&self.path);
        tokio::fs::write(&part, json).await?;
        tokio::fs::rename(&part, &self.path).await?;
        debug!(
            "Checkpointed {} ({} bytes remaining)",
            self.path.display(),
            checkpoint.remaining_bytes()
        );
        Ok(())
    }

    /// Loads the checkpoint for job `name` from `dir`.
    pub async fn load(dir: &Path, name: &str) -> Result<Checkpoint, DownloadError> {
        let path = checkpoint_path(dir, name);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DownloadError::CheckpointNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        parse_checkpoint(&content)
    }
}

/// Parses checkpoint JSON, rejecting versions newer than this build.
pub fn parse_checkpoint(content: &[u8]) -> Result<Checkpoint, DownloadError> {
    let probe: VersionProbe = serde_json::from_slice(content)?;
    if probe.version > CHECKPOINT_VERSION {
        return Err(DownloadError::UnsupportedCheckpoint {
            found: probe.version,
            supported: CHECKPOINT_VERSION,
        });
    }
    Ok(serde_json::from_slice(content)?)
}

/// Job name for a name or URL.
///
/// URLs map to the file name they download to, so
/// `https://host/pub/file.iso` and `file.iso` both name job `file.iso`.
pub fn job_name(name_or_url: &str) -> String {
    if let Ok(name) = file_name_from_url(name_or_url) {
        return name;
    }
    let trimmed = name_or_url.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// `<dir>/<name>.status`
pub fn checkpoint_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}{}", name, STATUS_SUFFIX))
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// One in-progress job found in the job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    /// Name to pass to resume.
    pub name: String,
    /// Source URL.
    pub url: String,
    /// Total length in bytes.
    pub length: u64,
    /// Bytes still to transfer.
    pub remaining: u64,
}

/// Lists unfinished jobs with a checkpoint in `dir`, sorted by name.
///
/// A missing directory has no jobs. Unreadable checkpoints are skipped, as
/// are finished jobs and jobs whose temp file is gone.
pub async fn list_jobs(dir: &Path) -> Result<Vec<JobSummary>, DownloadError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut jobs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_name = entry.file_name();
        let Some(name) = file_name
            .to_str()
            .and_then(|n| n.strip_suffix(STATUS_SUFFIX))
        else {
            continue;
        };

        let checkpoint = match StateStore::load(dir, name).await {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!("Skipping unreadable checkpoint {}: {}", name, e);
                continue;
            }
        };

        let remaining = checkpoint.remaining_bytes();
        let temp_path = temp_path_for(&dir.join(&checkpoint.file_name));
        if remaining == 0 || !tokio::fs::try_exists(&temp_path).await? {
            debug!("Skipping {}: nothing left to resume", name);
            continue;
        }

        jobs.push(JobSummary {
            name: name.to_string(),
            url: checkpoint.url,
            length: checkpoint.length,
            remaining,
        });
    }

    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            url: "http://localhost/big.iso".to_string(),
            file_name: "big.iso".to_string(),
            part_count: 3,
            length: 30,
            range_size: 10,
            max_connections: 4,
            ranges: vec![
                Range::bounded(10, 9),
                Range::bounded(14, 19),
                Range::bounded(20, 29),
            ],
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path(), "big.iso");
        store.save(sample).await.unwrap();

        assert!(store.path().ends_with("big.iso.status"));
        assert!(!dir.path().join("big.iso.status.part").exists());

        let loaded = StateStore::load(dir.path(), "big.iso").await.unwrap();
        assert_eq!(loaded, sample());
        assert_eq!(loaded.remaining_bytes(), 16);
    }

    #[tokio::test]
    async fn missing_checkpoint() {
        let dir = tempdir().unwrap();
        let result = StateStore::load(dir.path(), "nope").await;
        assert!(matches!(result, Err(DownloadError::CheckpointNotFound(n)) if n == "nope"));
    }

    #[test]
    fn missing_version_is_first_version() {
        let json = r#"{
            "url": "http://localhost/a",
            "file_name": "a",
            "part_count": 1,
            "length": 5,
            "range_size": 8,
            "max_connections": 2,
            "ranges": [{"start": 0, "end": 4}],
            "written_by": "a future build"
        }"#;
        let checkpoint = parse_checkpoint(json.as_bytes()).unwrap();
        assert_eq!(checkpoint.version, 1);
        assert_eq!(checkpoint.ranges, vec![Range::bounded(0, 4)]);
    }

    #[test]
    fn newer_version_is_rejected() {
        let json = r#"{"version": 7, "layout": "something else"}"#;
        assert!(matches!(
            parse_checkpoint(json.as_bytes()),
            Err(DownloadError::UnsupportedCheckpoint {
                found: 7,
                supported: CHECKPOINT_VERSION
            })
        ));
    }

    #[test]
    fn job_name_from_url_or_name() {
        assert_eq!(job_name("https://host/pub/file.iso"), "file.iso");
        assert_eq!(job_name("https://host/pub/file.iso?sig=1"), "file.iso");
        assert_eq!(job_name("file.iso"), "file.iso");
        assert_eq!(job_name("https://host/dir/"), "dir");
        assert_eq!(job_name("https://host"), "index.html");
        assert_eq!(job_name("jobs/file.iso"), "file.iso");
    }

    #[tokio::test]
    async fn lists_jobs_by_checkpoint() {
        let dir = tempdir().unwrap();
        StateStore::new(dir.path(), "b.bin")
            .save(|| Checkpoint {
                file_name: "b.bin".to_string(),
                ..sample()
            })
            .await
            .unwrap();
        StateStore::new(dir.path(), "a.bin")
            .save(|| Checkpoint {
                file_name: "a.bin".to_string(),
                ..sample()
            })
            .await
            .unwrap();
        std::fs::write(dir.path().join("a.bin.tmp"), b"").unwrap();
        std::fs::write(dir.path().join("b.bin.tmp"), b"").unwrap();
        std::fs::write(dir.path().join("broken.status"), b"{").unwrap();

        let jobs = list_jobs(dir.path()).await.unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["a.bin", "b.bin"]);
        assert_eq!(jobs[0].remaining, 16);
    }

    #[tokio::test]
    async fn finished_and_orphaned_jobs_are_not_listed() {
        let dir = tempdir().unwrap();
        StateStore::new(dir.path(), "done.bin")
            .save(|| Checkpoint {
                file_name: "done.bin".to_string(),
                ranges: vec![Range::bounded(10, 9), Range::bounded(30, 29)],
                ..sample()
            })
            .await
            .unwrap();
        std::fs::write(dir.path().join("done.bin"), b"finished").unwrap();
        StateStore::new(dir.path(), "lost.bin")
            .save(|| Checkpoint {
                file_name: "lost.bin".to_string(),
                ..sample()
            })
            .await
            .unwrap();

        assert!(list_jobs(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_dir_has_no_jobs() {
        let dir = tempdir().unwrap();
        let jobs = list_jobs(&dir.path().join("absent")).await.unwrap();
        assert!(jobs.is_empty());
    }
}
