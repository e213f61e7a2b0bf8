//! Stevedore - Metrics
//!
//! Internal metrics collection for observability.
//!
//! # Overview
//!
//! This crate provides:
//! - Atomic metric primitives: [`Counter`], [`Gauge`], [`Histogram`]
//! - The [`MetricsProvider`] trait components implement to expose a snapshot
//!   of their metrics for the process-wide dump (SIGUSR1 / `--metric-dump`)
//!
//! # Design Principles
//!
//! - **Lock-free**: all metrics use relaxed atomic operations
//! - **Low overhead**: no allocations during metric updates
//! - **Pull-based**: components own their metrics behind an `Arc`; a
//!   lightweight handle implementing [`MetricsProvider`] stays valid after
//!   the component is consumed by its `run()`
//!
//! # Metrics Handle Pattern
//!
//! ```text
//! Component (owns Arc<Metrics>)
//!     │
//!     ├──► metrics_handle() → Handle (clones Arc, implements MetricsProvider)
//!     │
//!     └──► run() [consumes self, Arc keeps metrics alive]
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Monotonically increasing counter
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    /// Create a new counter initialized to 0
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Increment the counter by `val`
    #[inline]
    pub fn add(&self, val: u64) {
        self.0.fetch_add(val, Ordering::Relaxed);
    }

    /// Increment the counter by 1
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    /// Get the current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-value gauge
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    /// Create a new gauge initialized to 0
    #[inline]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Replace the current value
    #[inline]
    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    /// Get the current value
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Streaming histogram tracking count / sum / min / max
///
/// Mean is derived at snapshot time. Values are dimensionless; callers pick
/// the unit (bytes, records, microseconds) and keep it consistent.
#[derive(Debug)]
pub struct Histogram {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    /// Create a new, empty histogram
    pub const fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
        }
    }

    /// Record one observation
    pub fn record(&self, val: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(val, Ordering::Relaxed);
        self.min.fetch_min(val, Ordering::Relaxed);
        self.max.fetch_max(val, Ordering::Relaxed);
    }

    /// Record a duration in microseconds
    pub fn record_duration(&self, d: Duration) {
        self.record(d.as_micros() as u64);
    }

    /// Get a point-in-time snapshot
    pub fn snapshot(&self) -> HistogramSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        HistogramSnapshot {
            count,
            sum,
            min: if count == 0 {
                0
            } else {
                self.min.load(Ordering::Relaxed)
            },
            max: self.max.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a [`Histogram`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

impl HistogramSnapshot {
    /// Arithmetic mean of all observations, 0.0 when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum as f64 / self.count as f64
        }
    }
}

impl std::fmt::Display for HistogramSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "count={} sum={} min={} max={} mean={:.1}",
            self.count,
            self.sum,
            self.min,
            self.max,
            self.mean()
        )
    }
}

/// Implemented by component metrics handles so the process-wide dump task
/// can render every component without knowing its concrete type.
pub trait MetricsProvider: Send + Sync {
    /// Component name used as the dump prefix, e.g. `"queue"`
    fn component(&self) -> &'static str;

    /// Name/value pairs to render, in display order
    fn dump(&self) -> Vec<(String, String)>;
}
