use std::time::Duration;
use tokio::time::Instant;

/// Tracks download pacing for a single domain
///
/// One instance exists per domain for the life of a run. The scheduler holds
/// it behind a lock while computing and sleeping out the wait, and releases
/// the lock before the transfer itself begins.
#[derive(Debug, Clone)]
pub struct DomainRateState {
    pub domain: String,

    /// When the most recent download from this domain was dispatched
    pub last_request: Option<Instant>,

    /// Downloads dispatched to this domain in the current run
    pub request_count: u64,
}

impl DomainRateState {
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            last_request: None,
            request_count: 0,
        }
    }

    /// How long to wait before the next request may start
    ///
    /// Returns `Duration::ZERO` when the domain is idle or the interval has
    /// already elapsed.
    pub fn wait_time(&self, min_interval: Duration, now: Instant) -> Duration {
        match self.last_request {
            Some(last) => min_interval.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Records that a request was dispatched at `now`
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request = Some(now);
    }
}
