//! Cooperative per-host request throttling.
//!
//! Enforces a minimum interval between requests to the same host so
//! sequential pagination does not hammer a repository. Throttling is
//! per-host: requests to different hosts never wait on each other.
//! Rate limiting is cooperative within this process, not enforced
//! across processes.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

/// Per-host minimum-interval throttle.
///
/// Designed to be shared behind `Arc` across harvest jobs. `DashMap`
/// provides lock-free host lookup; the per-host `Mutex<Option<Instant>>`
/// makes the read-update of the last request time atomic.
#[derive(Debug)]
pub struct Throttle {
    /// Minimum delay between requests to one host.
    min_interval: Duration,
    /// Per-host last-request state. Arc lets us clone the entry and drop
    /// the DashMap shard lock before awaiting on the inner Mutex.
    hosts: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl Throttle {
    /// Creates a throttle with the given minimum interval.
    ///
    /// A zero interval disables throttling entirely.
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            hosts: DashMap::new(),
        }
    }

    /// Waits until a request to the URL's host is allowed, then records
    /// the request time.
    ///
    /// The first request to a host proceeds immediately.
    pub async fn acquire(&self, url: &Url) {
        if self.min_interval.is_zero() {
            return;
        }
        let Some(host) = url.host_str() else {
            return;
        };

        let state = self
            .hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut last = state.lock().await;
        let now = Instant::now();
        if let Some(prev) = *last {
            let elapsed = now.duration_since(prev);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(host, wait_ms = wait.as_millis() as u64, "throttling request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}
