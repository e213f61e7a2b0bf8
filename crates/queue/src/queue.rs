//! Queue implementation over a fjall keyspace

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use stevedore_metrics::{Counter, Gauge, MetricsProvider};
use stevedore_protocol::Record;
use tokio_util::sync::CancellationToken;

use crate::QueueError;

/// Partition holding the queued records
const RECORDS_PARTITION: &str = "records";

/// Queue tuning knobs
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How long the peek stream sleeps at the tail before re-checking
    pub flush_delay: Duration,

    /// Periodic journal fsync interval; `None` leaves syncing to the OS
    pub fsync: Option<Duration>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            flush_delay: Duration::from_secs(1),
            fsync: Some(Duration::from_millis(100)),
        }
    }
}

/// Queue metrics, updated by all three lanes
#[derive(Debug, Default)]
struct QueueMetrics {
    written_records: Counter,
    written_bytes: Counter,
    read_records: Counter,
    read_bytes: Counter,
    dropped_records: Counter,
    last_written: Gauge,
    last_read: Gauge,
    last_deleted: Gauge,
}

struct Inner {
    keyspace: Keyspace,
    records: PartitionHandle,
    next_key: AtomicU64,
    flush_delay: Duration,
    metrics: QueueMetrics,
}

/// Handle to the persistent record queue
///
/// Cheap to clone; all lanes (append, peek, drop) may run concurrently from
/// distinct clones.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

impl Queue {
    /// Open (or create) the queue under `dir`
    ///
    /// Scans for the maximum existing key once; subsequent appends increment
    /// an in-memory counter. Keys deleted earlier are never reused.
    pub fn open(dir: impl AsRef<Path>, config: QueueConfig) -> crate::Result<Self> {
        let mut fjall_config = Config::new(dir.as_ref());
        if let Some(interval) = config.fsync {
            fjall_config = fjall_config.fsync_ms(Some(interval.as_millis() as u16));
        }
        let keyspace = fjall_config.open()?;
        let records = keyspace.open_partition(RECORDS_PARTITION, PartitionCreateOptions::default())?;

        let last_key = match records.last_key_value()? {
            Some((key, _)) => decode_key(&key),
            None => 0,
        };

        tracing::debug!(last_key, "queue opened");

        Ok(Self {
            inner: Arc::new(Inner {
                keyspace,
                records,
                next_key: AtomicU64::new(last_key + 1),
                flush_delay: config.flush_delay,
                metrics: QueueMetrics::default(),
            }),
        })
    }

    /// Append one record; on successful return the record is durable
    ///
    /// Returns the key the record was stored under.
    pub fn append(&self, record: &Record) -> crate::Result<u64> {
        let value = serde_json::to_vec(record).map_err(QueueError::Encode)?;
        let key = self.inner.next_key.fetch_add(1, Ordering::SeqCst);
        self.inner.records.insert(key.to_be_bytes(), &value)?;

        let m = &self.inner.metrics;
        m.written_records.inc();
        m.written_bytes.add(value.len() as u64);
        m.last_written.set(key);

        tracing::trace!(key, bytes = value.len(), "record enqueued");
        Ok(key)
    }

    /// Open a non-destructive, resumable reader over the queue
    ///
    /// The stream yields entries in key order starting at the lowest
    /// undeleted key, pausing at the tail for up to the configured flush
    /// delay. It ends only when `cancel` fires.
    pub fn peek(&self, cancel: CancellationToken) -> PeekStream {
        PeekStream {
            inner: Arc::clone(&self.inner),
            cursor: 0,
            cancel,
        }
    }

    /// Delete the first `n` remaining keys in one atomic batch write
    ///
    /// Deleting more than the current length deletes what exists. Returns
    /// the number of rows actually removed.
    pub fn drop_first(&self, n: usize) -> crate::Result<usize> {
        let mut batch = self.inner.keyspace.batch();
        let mut removed = 0usize;
        let mut last = 0u64;

        for entry in self.inner.records.iter().take(n) {
            let (key, _) = entry?;
            last = decode_key(&key);
            batch.remove(&self.inner.records, key);
            removed += 1;
        }

        if removed > 0 {
            batch.commit()?;
            self.inner.metrics.dropped_records.add(removed as u64);
            self.inner.metrics.last_deleted.set(last);
        }

        tracing::debug!(requested = n, removed, "dropped queue prefix");
        Ok(removed)
    }

    /// Approximate number of rows currently stored
    pub fn len(&self) -> u64 {
        self.inner.records.approximate_len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flush the journal to disk
    ///
    /// Called once at shutdown so everything appended is on stable storage
    /// before the process exits.
    pub fn persist(&self) -> crate::Result<()> {
        self.inner.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get a metrics handle for the process-wide dump
    pub fn metrics_handle(&self) -> QueueMetricsHandle {
        QueueMetricsHandle {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-destructive cursor over the queue, in key order
///
/// Each step opens a fresh view past the cursor, so appends made after the
/// stream was created are still seen. Rows that fail to decode are skipped
/// with an error log; a poison record must not wedge the stream.
pub struct PeekStream {
    inner: Arc<Inner>,
    cursor: u64,
    cancel: CancellationToken,
}

impl PeekStream {
    /// Yield the next entry, waiting at the tail until one arrives
    ///
    /// Returns `None` only on cancellation.
    pub async fn next(&mut self) -> Option<(u64, Record)> {
        loop {
            if self.cancel.is_cancelled() {
                return None;
            }
            match self.fetch_after_cursor() {
                Ok(Some((key, record))) => {
                    let m = &self.inner.metrics;
                    m.read_records.inc();
                    m.last_read.set(key);
                    self.cursor = key;
                    return Some((key, record));
                }
                Ok(None) => {
                    // Tail reached: release the snapshot and wait for fresh
                    // appends, bounded by the flush delay.
                    tokio::select! {
                        _ = tokio::time::sleep(self.inner.flush_delay) => {}
                        _ = self.cancel.cancelled() => return None,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, cursor = self.cursor, "queue read failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.inner.flush_delay) => {}
                        _ = self.cancel.cancelled() => return None,
                    }
                }
            }
        }
    }

    fn fetch_after_cursor(&mut self) -> crate::Result<Option<(u64, Record)>> {
        let start = self.cursor + 1;
        for entry in self.inner.records.range(start.to_be_bytes()..) {
            let (key, value) = entry?;
            let key = decode_key(&key);
            match serde_json::from_slice::<Record>(&value) {
                Ok(record) => {
                    self.inner.metrics.read_bytes.add(value.len() as u64);
                    return Ok(Some((key, record)));
                }
                Err(e) => {
                    tracing::error!(key, error = %e, "skipping undecodable queue entry");
                    self.cursor = key;
                }
            }
        }
        Ok(None)
    }
}

/// Metrics handle for the queue; includes the live length gauge
#[derive(Clone)]
pub struct QueueMetricsHandle {
    inner: Arc<Inner>,
}

impl MetricsProvider for QueueMetricsHandle {
    fn component(&self) -> &'static str {
        "queue"
    }

    fn dump(&self) -> Vec<(String, String)> {
        let m = &self.inner.metrics;
        let pending = m.last_read.get().saturating_sub(m.last_deleted.get());
        vec![
            ("length".into(), self.inner.records.approximate_len().to_string()),
            ("pending".into(), pending.to_string()),
            ("write.records".into(), m.written_records.get().to_string()),
            ("write.bytes".into(), m.written_bytes.get().to_string()),
            ("read.records".into(), m.read_records.get().to_string()),
            ("read.bytes".into(), m.read_bytes.get().to_string()),
            ("dropped.records".into(), m.dropped_records.get().to_string()),
            ("last.written".into(), m.last_written.get().to_string()),
            ("last.read".into(), m.last_read.get().to_string()),
            ("last.deleted".into(), m.last_deleted.get().to_string()),
        ]
    }
}

fn decode_key(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    if bytes.len() == 8 {
        buf.copy_from_slice(bytes);
    }
    u64::from_be_bytes(buf)
}

#[cfg(test)]
#[path = "queue_test.rs"]
mod queue_test;
