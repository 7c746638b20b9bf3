//! Job coordination: probing or resuming, fanning out workers, assembling.

use crate::assemble::OutputFile;
use crate::download::{download_range, ConnectionLimiter, FetchContext, RangeSlot};
use crate::error::DownloadError;
use crate::plan::{compact, part_count, plan_ranges};
use crate::probe::probe;
use crate::state::{job_name, Checkpoint, StateStore, CHECKPOINT_VERSION};
use crate::transport::Transport;
use crate::types::{DownloadConfig, Range};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// A download of one URL into one file, split into ranges.
///
/// Created either by probing a URL ([`DownloadJob::probe`]) or by loading a
/// checkpoint ([`DownloadJob::from_checkpoint`]), then driven to completion
/// with [`DownloadJob::run`].
#[derive(Debug, Clone)]
pub struct DownloadJob {
    url: String,
    file_name: String,
    length: Option<u64>,
    range_size: u64,
    part_count: usize,
    resumable: bool,
    max_connections: usize,
    skip_tls_verify: bool,
    ranges: Vec<Range>,
    config: DownloadConfig,
    resumed: bool,
}

impl DownloadJob {
    /// Probes `url` and plans its ranges.
    ///
    /// No file or checkpoint is created here; a failed probe leaves the job
    /// directory untouched.
    pub async fn probe(url: &str, config: &DownloadConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        let transport = Transport::new(config)?;
        let info = probe(&transport, url).await?;

        let (ranges, parts) = match (info.resumable, info.length) {
            (true, Some(length)) => {
                let parts = part_count(length, config.range_size)?;
                (plan_ranges(length, config.range_size, parts), parts)
            }
            _ => (vec![Range::unbounded()], 1),
        };

        info!(
            "📦 {}: {} range(s), length {:?}, resumable: {}",
            info.file_name,
            ranges.len(),
            info.length,
            info.resumable
        );

        Ok(Self {
            url: url.to_string(),
            file_name: info.file_name,
            length: info.length,
            range_size: config.range_size,
            part_count: parts,
            resumable: info.resumable,
            max_connections: config.max_connections,
            skip_tls_verify: config.skip_tls_verify,
            ranges,
            config: config.clone(),
            resumed: false,
        })
    }

    /// Rebuilds a job from its checkpoint, keeping only unfinished ranges.
    ///
    /// `name_or_url` is the job name or the original URL. Range size and
    /// connection count come from the checkpoint; TLS and retry settings come
    /// from `config`.
    pub async fn from_checkpoint(
        name_or_url: &str,
        config: &DownloadConfig,
    ) -> Result<Self, DownloadError> {
        config.validate()?;
        let name = job_name(name_or_url);
        let checkpoint = StateStore::load(&config.data_dir, &name).await?;
        let ranges = compact(&checkpoint.ranges);

        info!(
            "♻️  Resuming {}: {} of {} range(s) left, {} bytes remaining",
            checkpoint.file_name,
            ranges.len(),
            checkpoint.ranges.len(),
            checkpoint.remaining_bytes()
        );

        Ok(Self {
            url: checkpoint.url,
            file_name: checkpoint.file_name,
            length: Some(checkpoint.length),
            range_size: checkpoint.range_size,
            part_count: checkpoint.part_count,
            resumable: true,
            max_connections: checkpoint.max_connections.max(1),
            skip_tls_verify: config.skip_tls_verify,
            ranges,
            config: config.clone(),
            resumed: true,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    pub fn range_size(&self) -> u64 {
        self.range_size
    }

    pub fn part_count(&self) -> usize {
        self.part_count
    }

    pub fn is_resumable(&self) -> bool {
        self.resumable
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Ranges this job will fetch, in plan order.
    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Downloads every range and renames the temp file into place.
    ///
    /// A resumed job with nothing left whose final file already exists returns
    /// that file untouched.
    ///
    /// All workers are drained before returning, even after a failure. On
    /// failure the temp file and checkpoint stay behind for a later resume and
    /// the error of the first failed range (in plan order) is returned.
    pub async fn run(self) -> Result<PathBuf, DownloadError> {
        let transport = Transport::new(&DownloadConfig {
            skip_tls_verify: self.skip_tls_verify,
            ..self.config.clone()
        })?;
        let data_dir = self.config.data_dir.clone();

        let final_path = data_dir.join(&self.file_name);
        if self.resumed && self.ranges.is_empty() && tokio::fs::try_exists(&final_path).await? {
            info!("✅ {} is already complete", final_path.display());
            return Ok(final_path);
        }

        let file = OutputFile::open(&data_dir, &self.file_name, self.length, self.resumed).await?;
        let store = self
            .resumable
            .then(|| StateStore::new(&data_dir, &self.file_name));

        let slots: Arc<[RangeSlot]> = self.ranges.iter().copied().map(RangeSlot::new).collect();

        if let Some(store) = &store {
            if !self.resumed {
                store.save(|| self.checkpoint(&slots)).await?;
            }
        }

        let progress = self.progress_bar();
        let ctx = Arc::new(FetchContext {
            transport,
            url: self.url.clone(),
            file: file.clone(),
            progress: progress.clone(),
            single_range: slots.len() == 1,
        });
        let limiter = ConnectionLimiter::new(self.max_connections);

        let mut tasks = JoinSet::new();
        for index in 0..slots.len() {
            let ctx = Arc::clone(&ctx);
            let slots = Arc::clone(&slots);
            let limiter = limiter.clone();
            let retry = self.config.retry;
            tasks.spawn(async move {
                let result = download_range(&ctx, &limiter, &retry, &slots[index]).await;
                (index, result)
            });
        }

        let mut failures: Vec<Option<DownloadError>> = (0..slots.len()).map(|_| None).collect();
        let mut task_failure = None;
        let mut reported = 0usize;

        while let Some(joined) = tasks.join_next().await {
            reported += 1;
            match joined {
                Ok((index, Ok(()))) => {
                    debug!(
                        "Range {} done ({} retries), {}/{} reported",
                        index,
                        slots[index].retries(),
                        reported,
                        slots.len()
                    );
                }
                Ok((index, Err(e))) => {
                    error!(
                        "Range {} failed after {} retries: {}",
                        index,
                        slots[index].retries(),
                        e
                    );
                    failures[index] = Some(e);
                }
                Err(e) => {
                    error!("Task join error: {}", e);
                    task_failure.get_or_insert(DownloadError::TaskFailed(e.to_string()));
                }
            }

            if let Some(store) = &store {
                if let Err(e) = store.save(|| self.checkpoint(&slots)).await {
                    warn!("Failed to write checkpoint {}: {}", store.path().display(), e);
                }
            }
        }
        drop(ctx);

        if let Some(e) = failures.into_iter().flatten().next().or(task_failure) {
            progress.abandon_with_message("❌ Download failed!");
            return Err(e);
        }

        progress.finish_with_message("✅ Done");
        file.finalize().await
    }

    /// Snapshot of the job with the slots' current progress.
    fn checkpoint(&self, slots: &[RangeSlot]) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            url: self.url.clone(),
            file_name: self.file_name.clone(),
            part_count: self.part_count,
            length: self.length.unwrap_or(0),
            range_size: self.range_size,
            max_connections: self.max_connections,
            ranges: slots.iter().map(RangeSlot::snapshot).collect(),
        }
    }

    fn progress_bar(&self) -> indicatif::ProgressBar {
        if !self.config.show_progress {
            return indicatif::ProgressBar::hidden();
        }

        let Some(length) = self.length.filter(|_| self.resumable) else {
            let spinner = indicatif::ProgressBar::new_spinner();
            spinner.set_style(
                indicatif::ProgressStyle::default_spinner()
                    .template("{spinner:.cyan} {bytes} {msg} | {binary_bytes_per_sec}, {elapsed_precise} elapsed")
                    .unwrap_or_else(|_| indicatif::ProgressStyle::default_spinner()),
            );
            spinner.set_message(self.file_name.clone());
            return spinner;
        };

        let remaining: u64 = self.ranges.iter().filter_map(Range::remaining).sum();
        let bar = indicatif::ProgressBar::new(length);
        bar.set_style(
            indicatif::ProgressStyle::default_bar()
                .template("{spinner:.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg} | {binary_bytes_per_sec}, ETA {eta_precise}")
                .unwrap_or_else(|_| indicatif::ProgressStyle::default_bar())
                .progress_chars("█▓▒░ "),
        );
        bar.set_position(length.saturating_sub(remaining));
        bar.set_message(self.file_name.clone());
        bar
    }
}

/// Probes `url` and downloads it into the configured job directory.
pub async fn download(url: &str, config: &DownloadConfig) -> Result<PathBuf, DownloadError> {
    DownloadJob::probe(url, config).await?.run().await
}

/// Resumes the job named by `name_or_url` from its checkpoint.
pub async fn resume(name_or_url: &str, config: &DownloadConfig) -> Result<PathBuf, DownloadError> {
    DownloadJob::from_checkpoint(name_or_url, config)
        .await?
        .run()
        .await
}
