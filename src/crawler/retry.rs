//! Bounded retry with exponential backoff
//!
//! Only failures whose [`ErrorKind`] is retryable are attempted again.
//! Everything else is returned on the first attempt.

use crate::crawler::scheduler::DocumentSink;
use crate::{DownloadFailure, DownloadResult, ErrorKind};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// How many times to try a download and how long to back off between tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_retries: u32,
    /// Delay before the second attempt; doubles for each one after
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay,
        }
    }

    /// Backoff before attempt `attempt + 1` (zero-based): base × 2^attempt
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }

    /// Runs `attempt` until it succeeds, fails permanently, or attempts run out
    ///
    /// The closure receives the zero-based attempt number.
    pub async fn run<F, Fut>(&self, url: &str, mut attempt: F) -> DownloadResult
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = DownloadResult>,
    {
        let attempts = self.max_retries.max(1);
        let mut last_failure = None;

        for n in 0..attempts {
            let result = attempt(n).await;
            if result.success {
                return result;
            }

            let failure = result
                .error
                .clone()
                .unwrap_or_else(|| DownloadFailure::new(ErrorKind::ClientError, "download failed"));

            if !failure.kind.is_retryable() {
                return result;
            }

            if n + 1 < attempts {
                let wait = self.backoff(n);
                warn!(
                    "Download attempt {} failed for {}: {}. Retrying in {:?}",
                    n + 1,
                    url,
                    failure,
                    wait
                );
                tokio::time::sleep(wait).await;
            }
            last_failure = Some(failure);
        }

        let last = last_failure
            .unwrap_or_else(|| DownloadFailure::new(ErrorKind::ClientError, "download failed"));
        error!(
            "Download failed after {} attempts for {}: {}",
            attempts, url, last
        );

        DownloadResult::failure(
            url,
            DownloadFailure::new(
                last.kind,
                format!("Failed after {} attempts: {}", attempts, last.message),
            ),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Fetches `url` through `sink`, retrying transient failures per `policy`
pub async fn download_with_retry(
    sink: &dyn DocumentSink,
    url: &str,
    department: &str,
    policy: &RetryPolicy,
) -> DownloadResult {
    policy
        .run(url, |_| sink.fetch(url, department))
        .await
}
