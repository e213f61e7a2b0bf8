//! Backend URL pool with per-URL exponential backoff
//!
//! URLs move through a bounded channel: `acquire` receives one, `release`
//! sends it back - immediately on success, after a growing delay on
//! failure. Channel ownership is the mutual exclusion: a URL checked out by
//! one request cannot be handed to another until released.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Exponential backoff schedule
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay after the first consecutive failure
    pub base: Duration,

    /// Growth factor per additional consecutive failure
    pub factor: f64,

    /// Upper bound on the delay
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2.0,
            cap: Duration::from_secs(120),
        }
    }
}

/// Delay before the re-admission of a backend with `failures` consecutive
/// failures: `min(base · factor^(n-1), cap)`
pub fn backoff_delay(config: &BackoffConfig, failures: u32) -> Duration {
    let exp = config.factor.powi(failures.saturating_sub(1) as i32);
    let secs = (config.base.as_secs_f64() * exp).min(config.cap.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// One backend URL slot
///
/// Created at startup, never destroyed; only the pool's release path
/// mutates the failure counter.
#[derive(Debug)]
pub struct BackendUrl {
    url: String,
    failures: u32,
}

impl BackendUrl {
    /// The bulk endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Consecutive failures since the last success
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

impl std::fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url)
    }
}

struct Shared {
    slots: mpsc::Sender<BackendUrl>,
    available: Mutex<mpsc::Receiver<BackendUrl>>,
    closed: CancellationToken,
    backoff: BackoffConfig,
}

/// Bounded set of backend URLs with round-robin-ish delivery
#[derive(Clone)]
pub struct BackendPool {
    shared: Arc<Shared>,
}

impl BackendPool {
    /// Create a pool holding one slot per URL
    pub fn new(urls: Vec<String>, backoff: BackoffConfig) -> Self {
        let (slots, available) = mpsc::channel(urls.len().max(1));
        for url in urls {
            // Capacity equals the slot count, so this cannot fail.
            let _ = slots.try_send(BackendUrl { url, failures: 0 });
        }
        Self {
            shared: Arc::new(Shared {
                slots,
                available: Mutex::new(available),
                closed: CancellationToken::new(),
                backoff,
            }),
        }
    }

    /// Check out a URL, waiting until one is available
    ///
    /// Returns `None` once the pool is closed. When a URL is already
    /// available it wins over a concurrent close.
    pub async fn acquire(&self) -> Option<BackendUrl> {
        let mut available = self.shared.available.lock().await;
        tokio::select! {
            biased;
            url = available.recv() => url,
            _ = self.shared.closed.cancelled() => None,
        }
    }

    /// Return a URL to the pool
    ///
    /// `failed = false` re-admits immediately and resets the failure
    /// counter; `failed = true` parks the URL for the backoff delay before
    /// re-admission. Releases after close are discarded.
    pub fn release(&self, mut url: BackendUrl, failed: bool) {
        if self.shared.closed.is_cancelled() {
            tracing::debug!(url = %url, "pool closed, discarding backend");
            return;
        }

        if !failed {
            if url.failures > 0 {
                tracing::info!(url = %url, "backend is working again");
                url.failures = 0;
            }
            let _ = self.shared.slots.try_send(url);
            return;
        }

        url.failures += 1;
        let delay = backoff_delay(&self.shared.backoff, url.failures);
        tracing::warn!(
            url = %url,
            failures = url.failures,
            delay_ms = delay.as_millis() as u64,
            "backend failing, parked for backoff"
        );

        let slots = self.shared.slots.clone();
        let closed = self.shared.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    tracing::debug!(url = %url, "backend available again");
                    let _ = slots.try_send(url);
                }
                _ = closed.cancelled() => {}
            }
        });
    }

    /// Close the pool: unblocks all acquirers and discards parked URLs
    pub fn close(&self) {
        self.shared.closed.cancel();
    }
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
