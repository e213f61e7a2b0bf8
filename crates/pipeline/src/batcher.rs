//! Batcher - dual-trigger batch aggregation
//!
//! State machine (single task, cooperative):
//!
//! ```text
//! EMPTY   --first record-->            FILLING  (flush timer running)
//! FILLING --count == batch_size-->     READY
//! FILLING --timer, count > 0-->        READY
//! FILLING --timer, count == 0,
//!           reader done-->             terminated
//! READY   --delivered downstream-->    EMPTY
//! ```
//!
//! READY is the `send().await` on the downstream channel: while it blocks,
//! the peek stream is not polled and the queue backs up instead of memory.

use std::sync::Arc;
use std::time::Duration;

use stevedore_metrics::{Counter, Histogram, MetricsProvider};
use stevedore_protocol::{BulkFramer, IndexedBatch};
use stevedore_queue::PeekStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Configuration for the batcher
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Index name prefix; the destination index is `<prefix>-<suffix>`
    pub index_prefix: String,

    /// Bulk `_type` for every record
    pub doc_type: String,

    /// Maximum records per batch
    pub batch_size: usize,

    /// Maximum age of a non-full batch before it is flushed
    pub flush_delay: Duration,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            index_prefix: "logs".to_string(),
            doc_type: "log".to_string(),
            batch_size: stevedore_protocol::DEFAULT_BATCH_SIZE,
            flush_delay: Duration::from_secs(1),
        }
    }
}

/// Batcher metrics
#[derive(Debug, Default)]
struct BatcherMetrics {
    /// Records framed into batches
    records: Counter,

    /// Body bytes emitted
    bytes: Counter,

    /// Batches delivered downstream
    batches: Counter,

    /// Frame serialization failures (record dropped from the batch)
    errors: Counter,

    /// Records-per-batch distribution
    batch_size: Histogram,
}

/// Handle for accessing batcher metrics after `run()` consumed the batcher
#[derive(Clone)]
pub struct BatcherMetricsHandle {
    metrics: Arc<BatcherMetrics>,
}

impl MetricsProvider for BatcherMetricsHandle {
    fn component(&self) -> &'static str {
        "batcher"
    }

    fn dump(&self) -> Vec<(String, String)> {
        vec![
            ("records".into(), self.metrics.records.get().to_string()),
            ("bytes".into(), self.metrics.bytes.get().to_string()),
            ("batches".into(), self.metrics.batches.get().to_string()),
            ("errors".into(), self.metrics.errors.get().to_string()),
            ("size".into(), self.metrics.batch_size.snapshot().to_string()),
        ]
    }
}

/// Coalesces peeked records into bulk bodies
pub struct Batcher {
    peek: PeekStream,
    output: mpsc::Sender<IndexedBatch>,
    framer: BulkFramer,
    config: BatcherConfig,
    cancel: CancellationToken,
    reader_done: CancellationToken,
    metrics: Arc<BatcherMetrics>,
}

impl Batcher {
    /// Create a new batcher
    ///
    /// `reader_done` tells the batcher that the input side has reached end
    /// of input; a flush-delay window with no new records then terminates
    /// the batcher, which closes `output` by dropping it.
    pub fn new(
        peek: PeekStream,
        output: mpsc::Sender<IndexedBatch>,
        config: BatcherConfig,
        cancel: CancellationToken,
        reader_done: CancellationToken,
    ) -> Self {
        let framer = BulkFramer::new(config.index_prefix.as_str(), config.doc_type.as_str());
        Self {
            peek,
            output,
            framer,
            config,
            cancel,
            reader_done,
            metrics: Arc::new(BatcherMetrics::default()),
        }
    }

    /// Get a metrics handle for the process-wide dump
    pub fn metrics_handle(&self) -> BatcherMetricsHandle {
        BatcherMetricsHandle {
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Run until shutdown or drained input
    ///
    /// Dropping `self.output` on return is the downstream end-of-stream.
    pub async fn run(mut self) {
        tracing::info!(
            batch_size = self.config.batch_size,
            flush_delay_ms = self.config.flush_delay.as_millis() as u64,
            "batcher starting"
        );

        let mut batch = IndexedBatch::with_capacity(self.config.batch_size);
        let mut deadline = Instant::now() + self.config.flush_delay;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    if !batch.is_empty() {
                        tracing::debug!(records = batch.count(), "flushing final batch");
                        let _ = self.deliver(&mut batch).await;
                    }
                    tracing::debug!("batcher aborted");
                    break;
                }

                entry = self.peek.next() => {
                    // The peek stream ends only on cancellation.
                    let Some((key, record)) = entry else { break };
                    match self.framer.frame(&record) {
                        Ok(frame) => {
                            batch.append(&record.id, &frame);
                            tracing::trace!(key, id = %record.id, "record framed");
                        }
                        Err(e) => {
                            self.metrics.errors.inc();
                            tracing::error!(key, error = %e, "could not frame record");
                        }
                    }
                    if batch.count() >= self.config.batch_size {
                        if self.deliver(&mut batch).await.is_err() {
                            break;
                        }
                        deadline = Instant::now() + self.config.flush_delay;
                    }
                }

                _ = tokio::time::sleep_until(deadline) => {
                    if !batch.is_empty() {
                        if self.deliver(&mut batch).await.is_err() {
                            break;
                        }
                    } else if self.reader_done.is_cancelled() {
                        tracing::info!("input drained, batcher stopping");
                        break;
                    }
                    deadline = Instant::now() + self.config.flush_delay;
                }
            }
        }

        tracing::info!(
            batches = self.metrics.batches.get(),
            records = self.metrics.records.get(),
            "batcher stopping"
        );
    }

    /// Hand the batch downstream; Err means the receiver is gone
    async fn deliver(&mut self, batch: &mut IndexedBatch) -> Result<(), ()> {
        let full = std::mem::replace(batch, IndexedBatch::with_capacity(self.config.batch_size));
        let records = full.count();
        let bytes = full.len();

        if self.output.send(full).await.is_err() {
            tracing::warn!("batch channel closed, discarding batch");
            return Err(());
        }

        self.metrics.batches.inc();
        self.metrics.records.add(records as u64);
        self.metrics.bytes.add(bytes as u64);
        self.metrics.batch_size.record(records as u64);
        tracing::debug!(records, bytes, "batch delivered");
        Ok(())
    }
}

#[cfg(test)]
#[path = "batcher_test.rs"]
mod batcher_test;
