//! Range fetching: the connection limiter and the per-range worker.

use crate::assemble::OutputFile;
use crate::error::DownloadError;
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::types::Range;
use futures_util::StreamExt;
use reqwest::StatusCode;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Largest slice written to disk in one positional write.
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Arena entry for one range while a job runs.
///
/// Only the worker that owns the slot advances `start`; the coordinator reads
/// it when checkpointing. `start` only moves past bytes that were written.
#[derive(Debug)]
pub struct RangeSlot {
    start: AtomicU64,
    end: Option<u64>,
    retries: AtomicU32,
}

impl RangeSlot {
    pub fn new(range: Range) -> Self {
        Self {
            start: AtomicU64::new(range.start),
            end: range.end,
            retries: AtomicU32::new(0),
        }
    }

    /// Current bounds of the untransferred part.
    pub fn snapshot(&self) -> Range {
        Range {
            start: self.start.load(Ordering::Acquire),
            end: self.end,
        }
    }

    /// Retries spent on this range so far.
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    fn advance(&self, n: u64) {
        self.start.fetch_add(n, Ordering::AcqRel);
    }

    fn rewind(&self) -> u64 {
        self.start.swap(0, Ordering::AcqRel)
    }
}

/// Bounds the number of range requests in flight.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    semaphore: Arc<Semaphore>,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Waits for a free connection slot. The slot is released on drop.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, DownloadError> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|e| DownloadError::TaskFailed(format!("connection limiter closed: {}", e)))
    }

    /// Slots currently free.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Everything a worker needs besides its own slot.
#[derive(Debug)]
pub struct FetchContext {
    pub transport: Transport,
    pub url: String,
    pub file: OutputFile,
    pub progress: indicatif::ProgressBar,
    /// The job has exactly one range.
    pub single_range: bool,
}

/// Fetches the range at `slots[index]`: takes a connection slot, then runs
/// attempts under `retry` until the range is exhausted or fails for good.
///
/// The connection slot is held across retries and released before returning.
pub async fn download_range(
    ctx: &FetchContext,
    limiter: &ConnectionLimiter,
    retry: &RetryPolicy,
    slot: &RangeSlot,
) -> Result<(), DownloadError> {
    let permit = limiter.acquire().await?;

    let result = retry
        .run(|attempt| {
            if attempt > 1 {
                slot.retries.fetch_add(1, Ordering::Relaxed);
            }
            fetch_range(ctx, slot)
        })
        .await;

    drop(permit);
    result
}

/// One attempt at a range, starting from its current cursor.
///
/// Bytes are written at their absolute offset and the cursor advances after
/// each write, so a failed attempt keeps what it already wrote.
pub async fn fetch_range(ctx: &FetchContext, slot: &RangeSlot) -> Result<(), DownloadError> {
    if slot.end.is_none() {
        // An open-ended stream cannot be continued mid-way; start over.
        let previous = slot.rewind();
        if previous > 0 {
            ctx.progress.set_position(0);
        }
    }

    let range = slot.snapshot();
    if range.is_exhausted() {
        return Ok(());
    }

    let header = if ctx.single_range && range.start == 0 {
        None
    } else {
        range.header_value()
    };
    debug!("GET {} range={:?}", ctx.url, header);

    let response = ctx.transport.get(&ctx.url, header.as_deref()).await?;
    let status = response.status();
    let range_ignored = status == StatusCode::OK && header.is_some() && range.start > 0;
    if (status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT) || range_ignored {
        if range_ignored {
            warn!("Server ignored range {:?} for {}", header, ctx.url);
        }
        return Err(DownloadError::BadStatus {
            status,
            url: ctx.url.clone(),
        });
    }

    let mut stream = response.bytes_stream();
    while let Some(piece) = stream.next().await {
        let mut chunk = piece?;

        while !chunk.is_empty() {
            let mut buf = chunk.split_to(chunk.len().min(BUFFER_SIZE));
            let offset = slot.start.load(Ordering::Acquire);

            // Servers behind slicing CDNs may send past the requested end.
            if let Some(end) = slot.end {
                let need = end + 1 - offset;
                if buf.len() as u64 > need {
                    buf.truncate(need as usize);
                }
            }

            let written = buf.len() as u64;
            ctx.file.write_at(offset, buf).await?;
            slot.advance(written);
            ctx.progress.inc(written);

            if slot.snapshot().is_exhausted() {
                return Ok(());
            }
        }
    }

    match slot.end {
        None => Ok(()),
        Some(end) => {
            let start = slot.start.load(Ordering::Acquire);
            if start > end {
                Ok(())
            } else {
                Err(DownloadError::UnexpectedClose {
                    start,
                    end,
                    remaining: end + 1 - start,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DownloadConfig;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn context(server: &MockServer, single_range: bool) -> (FetchContext, TempDir) {
        let dir = tempdir().unwrap();
        let file = OutputFile::open(dir.path(), "f.bin", Some(10), false)
            .await
            .unwrap();
        let ctx = FetchContext {
            transport: Transport::new(&DownloadConfig::default()).unwrap(),
            url: format!("{}/f.bin", server.uri()),
            file,
            progress: indicatif::ProgressBar::hidden(),
            single_range,
        };
        (ctx, dir)
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn truncates_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/f.bin"))
            .and(header("range", "bytes=0-3"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"0123456789".to_vec()))
            .mount(&server)
            .await;

        let (ctx, dir) = context(&server, false).await;
        let slot = RangeSlot::new(Range::bounded(0, 3));
        fetch_range(&ctx, &slot).await.unwrap();

        assert_eq!(slot.snapshot(), Range::bounded(4, 3));
        let written = std::fs::read(dir.path().join("f.bin.tmp")).unwrap();
        assert_eq!(&written[..4], b"0123");
        assert_eq!(&written[4..], &[0u8; 6]);
    }

    #[tokio::test]
    async fn short_body_keeps_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"0123".to_vec()))
            .mount(&server)
            .await;

        let (ctx, _dir) = context(&server, false).await;
        let slot = RangeSlot::new(Range::bounded(0, 9));
        let result = fetch_range(&ctx, &slot).await;

        assert!(matches!(
            result,
            Err(DownloadError::UnexpectedClose {
                start: 4,
                end: 9,
                remaining: 6
            })
        ));
        assert_eq!(slot.snapshot().start, 4);
    }

    #[tokio::test]
    async fn full_response_to_offset_range_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec()))
            .mount(&server)
            .await;

        let (ctx, _dir) = context(&server, false).await;
        let slot = RangeSlot::new(Range::bounded(5, 9));
        let result = fetch_range(&ctx, &slot).await;

        assert!(matches!(result, Err(DownloadError::BadStatus { status, .. }) if status == StatusCode::OK));
        assert_eq!(slot.snapshot().start, 5);
    }

    #[tokio::test]
    async fn error_status_fails_without_writing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (ctx, _dir) = context(&server, false).await;
        let slot = RangeSlot::new(Range::bounded(0, 9));
        let result = download_range(&ctx, &ConnectionLimiter::new(1), &fast_retry(5), &slot).await;

        assert!(matches!(result, Err(DownloadError::BadStatus { .. })));
        assert_eq!(slot.retries(), 0);
        assert_eq!(slot.snapshot().start, 0);
    }

    #[tokio::test]
    async fn retry_continues_from_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=0-9"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"01234".to_vec()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("range", "bytes=5-9"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"56789".to_vec()))
            .expect(1)
            .mount(&server)
            .await;

        let (ctx, dir) = context(&server, false).await;
        let limiter = ConnectionLimiter::new(1);
        let slot = RangeSlot::new(Range::bounded(0, 9));
        download_range(&ctx, &limiter, &fast_retry(3), &slot)
            .await
            .unwrap();

        assert_eq!(slot.retries(), 1);
        assert_eq!(limiter.available(), 1);
        assert_eq!(
            std::fs::read(dir.path().join("f.bin.tmp")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn single_range_sends_no_header_from_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(move |req: &wiremock::Request| {
                if req.headers.contains_key("range") {
                    ResponseTemplate::new(416)
                } else {
                    ResponseTemplate::new(200).set_body_bytes(b"0123456789".to_vec())
                }
            })
            .mount(&server)
            .await;

        let (ctx, dir) = context(&server, true).await;
        let slot = RangeSlot::new(Range::unbounded());
        fetch_range(&ctx, &slot).await.unwrap();

        assert_eq!(slot.snapshot().start, 10);
        assert_eq!(
            std::fs::read(dir.path().join("f.bin.tmp")).unwrap(),
            b"0123456789"
        );
    }

    #[tokio::test]
    async fn limiter_bounds_concurrency() {
        let limiter = ConnectionLimiter::new(2);
        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            tasks.spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            });
        }
        while tasks.join_next().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(limiter.available(), 2);
    }
}
