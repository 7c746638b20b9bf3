//! Output file handling: the shared temp file and its final rename.

use crate::error::DownloadError;
use bytes::Bytes;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Suffix of the file being written while a job is in progress.
pub const TEMP_SUFFIX: &str = ".tmp";

/// The temp output file, shared by every worker of a job.
///
/// Cloning is cheap; every clone writes through the same descriptor. Writes
/// are positional and never move a shared cursor, so workers writing disjoint
/// ranges need no locking.
#[derive(Debug, Clone)]
pub struct OutputFile {
    file: Arc<File>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl OutputFile {
    /// Opens `<dir>/<name>.tmp`, creating `dir` if needed.
    ///
    /// With `resume` the existing file is reopened as-is; it must exist and,
    /// if `length` is known, have exactly that length. Otherwise any stale
    /// file is truncated and, if `length` is known, pre-sized to it.
    pub async fn open(
        dir: &Path,
        name: &str,
        length: Option<u64>,
        resume: bool,
    ) -> Result<Self, DownloadError> {
        tokio::fs::create_dir_all(dir).await?;

        let final_path = dir.join(name);
        let temp_path = temp_path_for(&final_path);

        let path = temp_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            if resume {
                reopen(&path, length)
            } else {
                create(&path, length)
            }
        })
        .await
        .map_err(|e| DownloadError::TaskFailed(format!("open {}: {}", temp_path.display(), e)))??;

        Ok(Self {
            file: Arc::new(file),
            temp_path,
            final_path,
        })
    }

    /// Writes all of `data` at `offset`.
    pub async fn write_at(&self, offset: u64, data: Bytes) -> Result<(), DownloadError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || write_all_at(&file, &data, offset))
            .await
            .map_err(|e| DownloadError::TaskFailed(format!("write: {}", e)))??;
        Ok(())
    }

    /// Path of the in-progress file.
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Path the file gets once complete.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Syncs the temp file and renames it to its final name.
    ///
    /// Consumes this handle; other clones must already be dropped so the
    /// descriptor is closed before the rename.
    pub async fn finalize(self) -> Result<PathBuf, DownloadError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| DownloadError::TaskFailed(format!("sync: {}", e)))??;
        drop(self.file);

        tokio::fs::rename(&self.temp_path, &self.final_path).await?;
        info!(
            "Renamed {} to {}",
            self.temp_path.display(),
            self.final_path.display()
        );
        Ok(self.final_path)
    }
}

fn create(path: &Path, length: Option<u64>) -> Result<File, DownloadError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    if let Some(length) = length {
        file.set_len(length)?;
    }
    Ok(file)
}

fn reopen(path: &Path, length: Option<u64>) -> Result<File, DownloadError> {
    let file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(DownloadError::TempFileMissing(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if let Some(expected) = length {
        let actual = file.metadata()?.len();
        if actual != expected {
            return Err(DownloadError::TempFileLength {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }
    }
    Ok(file)
}

/// `<final>.tmp`
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

#[cfg(unix)]
fn write_all_at(file: &File, data: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn write_all_at(file: &File, mut data: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !data.is_empty() {
        let n = file.seek_write(data, offset)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to write whole buffer",
            ));
        }
        data = &data[n..];
        offset += n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn disjoint_writes_land_at_offsets() {
        let dir = tempdir().unwrap();
        let out = OutputFile::open(dir.path(), "data.bin", Some(10), false)
            .await
            .unwrap();

        let a = out.clone();
        let b = out.clone();
        let (ra, rb) = tokio::join!(
            a.write_at(5, Bytes::from_static(b"56789")),
            b.write_at(0, Bytes::from_static(b"01234")),
        );
        ra.unwrap();
        rb.unwrap();
        drop(a);
        drop(b);

        let final_path = out.finalize().await.unwrap();
        assert_eq!(final_path, dir.path().join("data.bin"));
        assert_eq!(std::fs::read(&final_path).unwrap(), b"0123456789");
        assert!(!dir.path().join("data.bin.tmp").exists());
    }

    #[tokio::test]
    async fn resume_keeps_existing_bytes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.tmp"), b"abcdef").unwrap();

        let out = OutputFile::open(dir.path(), "f", Some(6), true).await.unwrap();
        out.write_at(3, Bytes::from_static(b"XYZ")).await.unwrap();
        let path = out.finalize().await.unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"abcXYZ");
    }

    #[tokio::test]
    async fn resume_needs_the_temp_file() {
        let dir = tempdir().unwrap();
        let result = OutputFile::open(dir.path(), "f", Some(6), true).await;

        assert!(matches!(result, Err(DownloadError::TempFileMissing(p)) if p == dir.path().join("f.tmp")));
        assert!(!dir.path().join("f.tmp").exists());
    }

    #[tokio::test]
    async fn resume_rejects_wrong_length() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.tmp"), b"abc").unwrap();

        let result = OutputFile::open(dir.path(), "f", Some(6), true).await;
        assert!(matches!(
            result,
            Err(DownloadError::TempFileLength {
                expected: 6,
                actual: 3,
                ..
            })
        ));
        assert_eq!(std::fs::read(dir.path().join("f.tmp")).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn fresh_open_truncates_stale_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.tmp"), b"stale content here").unwrap();

        let out = OutputFile::open(dir.path(), "f", Some(4), false).await.unwrap();
        assert_eq!(std::fs::metadata(out.temp_path()).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn creates_missing_parent_dirs() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let out = OutputFile::open(&nested, "f", None, false).await.unwrap();
        assert!(out.temp_path().exists());
        assert_eq!(out.final_path(), nested.join("f"));
    }
}
