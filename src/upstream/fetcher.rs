//! Paced, retrying page fetcher.
//!
//! Every request, retries included, waits until at least `min_interval` has
//! passed since the previous one. A failed attempt is followed by a backoff
//! that doubles with each attempt, so waits strictly increase.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};

use super::{Page, PageSource};
use crate::error::FetchError;

/// Largest page the upstream serves.
pub const UPSTREAM_MAX_PAGE_SIZE: usize = 100;

/// How often and how patiently a page is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first.
    pub attempts: u32,
    /// Wait after the first failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based):
    /// `base_delay * 2^(attempt - 1)`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

/// Wraps a [`PageSource`] with request pacing and bounded retries.
#[derive(Debug)]
pub struct RateLimitedFetcher {
    source: Arc<dyn PageSource>,
    min_interval: Duration,
    retry: RetryPolicy,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimitedFetcher {
    /// Creates a fetcher over `source`.
    #[must_use]
    pub fn new(source: Arc<dyn PageSource>, min_interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            source,
            min_interval,
            retry,
            last_request: Mutex::new(None),
        }
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Fetches one page, retrying transient failures.
    ///
    /// `page_size` is clamped to `1..=UPSTREAM_MAX_PAGE_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] with the page index, attempt count and last
    /// error once every attempt has failed.
    pub async fn fetch_page(&self, page_index: usize, page_size: usize) -> Result<Page, FetchError> {
        let page_size = page_size.clamp(1, UPSTREAM_MAX_PAGE_SIZE);
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0_u32;

        loop {
            attempt += 1;
            self.pace().await;
            match self.source.fetch(page_index, page_size).await {
                Ok(page) => {
                    if attempt > 1 {
                        tracing::info!(page_index, attempt, "page recovered after retry");
                    }
                    tracing::debug!(page_index, records = page.results.len(), "page fetched");
                    return Ok(page);
                }
                Err(err) if attempt < attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        page_index,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "page fetch failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(
                        page_index,
                        attempts,
                        error = %err,
                        "page fetch failed, retries exhausted"
                    );
                    return Err(FetchError {
                        page_index,
                        attempts,
                        last_error: err,
                    });
                }
            }
        }
    }

    /// Waits out the minimum spacing since the previous request.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            sleep_until(previous + self.min_interval).await;
        }
        *last = Some(Instant::now());
    }
}
