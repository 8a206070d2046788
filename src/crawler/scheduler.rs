//! Download scheduler: bounded worker pool with per-domain pacing
//!
//! This module handles:
//! - Global concurrency limiting via a semaphore
//! - Per-domain minimum intervals between downloads
//! - Retry of transient failures (see [`crate::crawler::retry`])
//! - Cooperative shutdown that still accounts for every URL

use crate::crawler::retry::RetryPolicy;
use crate::state::DomainRateState;
use crate::url::domain_of;
use crate::{DownloadFailure, DownloadResult, ErrorKind};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Destination for scheduled downloads
///
/// Implementors perform one complete fetch-validate-store cycle per call and
/// report the outcome; they never panic on network or storage failures.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn fetch(&self, url: &str, department: &str) -> DownloadResult;
}

/// Concurrent downloader with per-domain rate limiting
///
/// Cloning is cheap; clones share domain state and the shutdown flag.
#[derive(Clone)]
pub struct DownloadScheduler {
    sink: Arc<dyn DocumentSink>,

    /// Per-domain pacing state, created on first use
    domains: Arc<DashMap<String, Arc<Mutex<DomainRateState>>>>,

    max_concurrent: usize,
    min_interval: Duration,
    retry: RetryPolicy,
    shutdown: Arc<AtomicBool>,
}

impl DownloadScheduler {
    /// Creates a new scheduler
    ///
    /// # Arguments
    ///
    /// * `sink` - Performs the actual transfers
    /// * `max_concurrent` - Size of the worker pool
    /// * `min_interval` - Minimum time between two downloads from one domain
    /// * `retry` - Retry policy applied to each URL
    pub fn new(
        sink: Arc<dyn DocumentSink>,
        max_concurrent: usize,
        min_interval: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sink,
            domains: Arc::new(DashMap::new()),
            max_concurrent: max_concurrent.max(1),
            min_interval,
            retry,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shares an externally owned shutdown flag (e.g. set from a Ctrl-C handler)
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Number of domains that have received at least one download
    pub fn tracked_domains(&self) -> usize {
        self.domains.len()
    }

    /// Downloads every URL on the worker pool
    ///
    /// Returns exactly one result per input URL, in completion order. URLs
    /// not yet dispatched when shutdown is requested yield `Cancelled`
    /// failures.
    pub async fn download_batch(&self, urls: &[String], department: &str) -> Vec<DownloadResult> {
        if urls.is_empty() {
            return Vec::new();
        }

        let total = urls.len();
        info!(
            "Starting concurrent download of {} PDFs for {} with {} workers",
            total, department, self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<usize, String> = HashMap::new();
        let mut results = Vec::with_capacity(total);

        for (index, url) in urls.iter().enumerate() {
            let permit = if self.is_shutting_down() {
                None
            } else {
                semaphore.clone().acquire_owned().await.ok()
            };

            let permit = match permit {
                Some(permit) if !self.is_shutting_down() => permit,
                _ => {
                    results.push(cancelled(url));
                    continue;
                }
            };

            pending.insert(index, url.clone());
            let this = self.clone();
            let url = url.clone();
            let department = department.to_string();
            tasks.spawn(async move {
                let _permit = permit;
                let result = this.download_with_rate_limit(&url, &department).await;
                (index, result)
            });
        }

        let mut completed = results.len();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => {
                    pending.remove(&index);
                    completed += 1;
                    log_progress(completed, total, &result);
                    results.push(result);
                }
                Err(e) => error!("Download task for {} aborted: {}", department, e),
            }
        }

        // Tasks that panicked never reported back
        for (_, url) in pending {
            results.push(DownloadResult::failure(
                &url,
                DownloadFailure::new(ErrorKind::Cancelled, "download task aborted"),
            ));
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        info!(
            "Completed concurrent download for {}: {}/{} successful",
            department,
            succeeded,
            results.len()
        );
        results
    }

    /// Downloads one URL, honouring the per-domain minimum interval
    ///
    /// Every attempt, retries included, waits for its domain slot. The
    /// domain lock is held only while waiting, never during the transfer.
    pub async fn download_with_rate_limit(&self, url: &str, department: &str) -> DownloadResult {
        let domain = match domain_of(url) {
            Some(domain) => domain,
            None => {
                return DownloadResult::failure(
                    url,
                    DownloadFailure::new(ErrorKind::ClientError, format!("no domain in {}", url)),
                )
            }
        };
        let domain = domain.as_str();

        self.retry
            .run(url, move |_| async move {
                self.acquire_slot(domain).await;
                self.sink.fetch(url, department).await
            })
            .await
    }

    /// Waits until `domain` may receive another request, then claims the slot
    async fn acquire_slot(&self, domain: &str) {
        let state = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(DomainRateState::new(domain))))
            .clone();

        let mut state = state.lock().await;
        let wait = state.wait_time(self.min_interval, Instant::now());
        if !wait.is_zero() {
            debug!("Rate limiting: sleeping {:?} for domain {}", wait, domain);
            tokio::time::sleep(wait).await;
        }
        state.record_request(Instant::now());
    }
}

fn cancelled(url: &str) -> DownloadResult {
    DownloadResult::failure(
        url,
        DownloadFailure::new(ErrorKind::Cancelled, "shutdown requested before dispatch"),
    )
}

fn log_progress(completed: usize, total: usize, result: &DownloadResult) {
    match &result.error {
        Some(err) => info!(
            "[{}/{}] Failed: {} ({})",
            completed, total, result.url, err
        ),
        None if result.skipped => info!(
            "[{}/{}] Up to date: {}",
            completed, total, result.url
        ),
        None => info!(
            "[{}/{}] Downloaded: {} ({:.2} MB)",
            completed,
            total,
            result.url,
            result.file_size as f64 / (1024.0 * 1024.0)
        ),
    }
}
