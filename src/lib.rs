//! hget - resumable, parallel-range HTTP downloads
//!
//! This library downloads a single HTTP(S) resource over many connections at
//! once. It probes the server for byte-range support, splits the resource into
//! fixed-size ranges, fetches them concurrently under a connection budget and
//! writes each range straight to its offset in a shared temp file. Progress is
//! checkpointed so an interrupted job can be resumed later.
//!
//! # Features
//!
//! - **Parallel Ranges**: One worker per range, bounded by a connection limit
//! - **Resumable Jobs**: JSON checkpoints after every finished range
//! - **Automatic Retry**: Retries continue from the last written byte
//! - **Redirect Aware**: `Range` headers survive cross-host redirects
//! - **Graceful Fallback**: Servers without range support get a single stream
//!
//! # Example
//!
//! ```no_run
//! use hget::{download, DownloadConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig {
//!     max_connections: 16,
//!     ..DownloadConfig::default()
//! };
//! let path = download("https://example.com/debian.iso", &config).await?;
//! println!("saved to {}", path.display());
//! # Ok(())
//! # }
//! ```

mod assemble;
mod download;
mod error;
mod orchestrator;
mod plan;
mod probe;
mod retry;
mod state;
mod transport;
mod types;

pub use assemble::{temp_path_for, OutputFile, TEMP_SUFFIX};
pub use download::{
    download_range, fetch_range, ConnectionLimiter, FetchContext, RangeSlot, BUFFER_SIZE,
};
pub use error::DownloadError;
pub use orchestrator::{download, resume, DownloadJob};
pub use plan::{compact, part_count, plan, plan_ranges};
pub use probe::{file_name_from_url, probe, ProbeInfo};
pub use retry::RetryPolicy;
pub use state::{
    checkpoint_path, job_name, list_jobs, parse_checkpoint, Checkpoint, JobSummary, StateStore,
    CHECKPOINT_VERSION, STATUS_SUFFIX,
};
pub use transport::Transport;
pub use types::{
    default_data_dir, DownloadConfig, Range, DATA_DIR_NAME, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_REDIRECTS, DEFAULT_RANGE_SIZE,
};
