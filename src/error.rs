//! Error types for download operations.

use reqwest::StatusCode;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while probing, fetching or assembling a download.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Probe or range fetch received a status other than 200 or 206.
    #[error("bad response status {status} from {url}")]
    BadStatus {
        /// The status the server answered with.
        status: StatusCode,
        /// The URL of the request that received it.
        url: String,
    },

    /// A redirect chain grew past the configured limit.
    #[error("stopped after {0} consecutive redirects")]
    RedirectLimitExceeded(usize),

    /// The server closed the body before the range was fully transferred.
    #[error("server closed the connection with {remaining} bytes of range {start}-{end} outstanding")]
    UnexpectedClose {
        /// Cursor of the range when the stream ended.
        start: u64,
        /// Inclusive end of the range.
        end: u64,
        /// Bytes still missing.
        remaining: u64,
    },

    /// Local file error (create, write, sync, rename).
    #[error(transparent)]
    Io(#[from] io::Error),

    /// HTTP request or body stream error.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// Checkpoint serialization error.
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    /// Assembled content did not match its expected digest.
    ///
    /// Reserved: nothing in the engine verifies content yet.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumFailure {
        /// Digest the content should have had.
        expected: String,
        /// Digest the content actually had.
        actual: String,
    },

    /// The URL could not be parsed.
    #[error("invalid url '{0}'")]
    InvalidUrl(String),

    /// A response header carried a value we could not interpret.
    #[error("invalid {name} header: {value}")]
    InvalidHeader {
        /// Header name.
        name: &'static str,
        /// Raw header value.
        value: String,
    },

    /// Configuration values that cannot drive a download.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No checkpoint exists for the named job.
    #[error("no checkpoint found for job '{0}'")]
    CheckpointNotFound(String),

    /// The checkpoint was written by a newer schema than this build understands.
    #[error("checkpoint version {found} is newer than supported version {supported}")]
    UnsupportedCheckpoint {
        /// Version recorded in the file.
        found: u32,
        /// Highest version this build reads.
        supported: u32,
    },

    /// No response headers arrived within the configured ceiling.
    #[error("no response within {0:?}")]
    Timeout(std::time::Duration),

    /// A resumed job's temp file is gone, so its finished ranges are lost.
    #[error("temp file {} is missing; start the download again", .0.display())]
    TempFileMissing(PathBuf),

    /// A resumed job's temp file does not have the resource's length.
    #[error("temp file {} is {actual} bytes, expected {expected}", .path.display())]
    TempFileLength {
        /// The temp file.
        path: PathBuf,
        /// Length of the resource.
        expected: u64,
        /// Length found on disk.
        actual: u64,
    },

    /// A worker task panicked or was aborted.
    #[error("download task failed: {0}")]
    TaskFailed(String),
}

impl DownloadError {
    /// Whether another attempt at the same request may succeed.
    ///
    /// Network-level failures and short bodies are transient. Local disk
    /// faults, bad statuses and redirect loops are not fixed by retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::UnexpectedClose { .. } | DownloadError::Timeout(_) => true,
            DownloadError::Reqwest(e) => !e.is_builder() && !e.is_redirect(),
            _ => false,
        }
    }
}
