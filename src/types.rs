//! Data structures shared across the download engine.

use crate::error::DownloadError;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default range size (64 MiB). Should match the slice size of caching proxies
/// such as nginx's `slice` module so every range maps onto one cached slice.
pub const DEFAULT_RANGE_SIZE: u64 = 64 * 1024 * 1024;

/// Default number of parallel connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 128;

/// Default cap on redirects followed per request.
pub const DEFAULT_MAX_REDIRECTS: usize = 30;

/// Name of the job directory under the user's home directory.
pub const DATA_DIR_NAME: &str = ".hget";

/// A contiguous byte interval `[start, end]` of the remote resource.
///
/// `end == None` is the unbounded sentinel: read until the server closes the
/// stream. It is only used when the server does not support ranges.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// Next byte to transfer (inclusive). Advances as bytes are written.
    pub start: u64,
    /// Last byte of the range (inclusive), or `None` when unbounded.
    pub end: Option<u64>,
}

impl Range {
    /// A bounded range covering `start..=end`.
    pub fn bounded(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// The single open range used for non-resumable downloads.
    pub fn unbounded() -> Self {
        Self {
            start: 0,
            end: None,
        }
    }

    /// True once every byte of a bounded range has been written.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.end, Some(end) if self.start > end)
    }

    /// Bytes still to transfer, `None` for unbounded ranges.
    pub fn remaining(&self) -> Option<u64> {
        self.end
            .map(|end| end.saturating_add(1).saturating_sub(self.start))
    }

    /// `Range` header value for the untransferred part, e.g. `bytes=0-1023`.
    pub fn header_value(&self) -> Option<String> {
        self.end.map(|end| format!("bytes={}-{}", self.start, end))
    }
}

/// Configuration for a download job.
///
/// # Example
///
/// ```
/// use hget::DownloadConfig;
///
/// let config = DownloadConfig {
///     range_size: 8 * 1024 * 1024,
///     max_connections: 16,
///     ..DownloadConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Size of each byte range in bytes (default: 64 MiB).
    pub range_size: u64,
    /// Maximum number of concurrently in-flight range requests (default: 128).
    pub max_connections: usize,
    /// Skip TLS certificate verification (default: false).
    pub skip_tls_verify: bool,
    /// Directory holding temp files, final files and checkpoints
    /// (default: `~/.hget`).
    pub data_dir: PathBuf,
    /// Ceiling on establishing a single connection.
    pub connect_timeout: Duration,
    /// Ceiling on waiting for response headers, redirects included. The body
    /// is not covered. `None` disables it.
    pub request_timeout: Option<Duration>,
    /// Longest idle gap between reads of a response body. `None` disables it.
    pub read_timeout: Option<Duration>,
    /// Redirects followed before a request fails.
    pub max_redirects: usize,
    /// Retry policy applied to every range.
    pub retry: RetryPolicy,
    /// Draw a progress bar on stderr.
    pub show_progress: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            range_size: DEFAULT_RANGE_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            skip_tls_verify: false,
            data_dir: default_data_dir(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Some(Duration::from_secs(300)),
            read_timeout: Some(Duration::from_secs(60)),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            retry: RetryPolicy::default(),
            show_progress: false,
        }
    }
}

impl DownloadConfig {
    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.range_size == 0 {
            return Err(DownloadError::InvalidConfig(
                "range size must be greater than zero".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(DownloadError::InvalidConfig(
                "connection count must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(DownloadError::InvalidConfig(
                "retry policy must allow at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

/// `~/.hget`, or `./.hget` when the home directory cannot be determined.
pub fn default_data_dir() -> PathBuf {
    home::home_dir()
        .map(|home| home.join(DATA_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DATA_DIR_NAME))
}
