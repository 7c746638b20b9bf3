//! Bounded retry policy for range fetches.

use crate::error::DownloadError;
use std::future::Future;
use std::time::Duration;
use tokio_retry2::strategy::{jitter, FixedInterval};
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

/// How many times a range is attempted and how long to wait in between.
///
/// Transient network failures are expected on long transfers, so the default
/// attempt count is large. Each attempt resumes from the range's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Pause before each retry.
    pub delay: Duration,
    /// Randomize each pause to spread out reconnects.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1000,
            delay: Duration::from_millis(500),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that tries once and never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delays between attempts; yields `max_attempts - 1` values.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let with_jitter = self.jitter;
        FixedInterval::new(self.delay)
            .map(move |d| if with_jitter { jitter(d) } else { d })
            .take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Errors for which
    /// [`DownloadError::is_retryable`] is false end the loop immediately.
    /// When attempts run out the last error is returned.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, DownloadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, DownloadError>>,
    {
        let mut attempt = 0u32;
        let max_attempts = self.max_attempts;

        Retry::spawn(self.delays(), || {
            attempt += 1;
            let current = attempt;
            let fut = op(current);
            async move {
                match fut.await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() => {
                        if current < max_attempts {
                            warn!("Attempt {}/{} failed: {}", current, max_attempts, e);
                        }
                        RetryError::to_transient(e)
                    }
                    Err(e) => RetryError::to_permanent(e),
                }
            }
        })
        .await
    }
}
