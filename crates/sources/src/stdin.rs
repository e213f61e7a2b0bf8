//! Line-oriented stdin source

use std::borrow::Cow;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use stevedore_metrics::{Counter, MetricsProvider};
use stevedore_protocol::InputRecord;
use stevedore_queue::Queue;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{CharsetDecoder, SourceError};

/// Configuration for the stdin source
#[derive(Debug, Clone)]
pub struct StdinConfig {
    /// Fallback charset tried when a line is not valid UTF-8
    pub input_charset: String,
}

impl Default for StdinConfig {
    fn default() -> Self {
        Self {
            input_charset: "ISO-8859-1".to_string(),
        }
    }
}

/// Reader metrics
#[derive(Debug, Default)]
struct ReaderMetrics {
    /// Lines that produced a valid record
    in_records: Counter,

    /// Raw bytes read, including dropped lines
    in_bytes: Counter,

    /// Lines dropped (bad charset, bad JSON, failed validation)
    in_errors: Counter,

    /// Records lost because the queue append failed
    append_errors: Counter,
}

/// Handle for accessing reader metrics after `run()` consumed the source
#[derive(Clone)]
pub struct ReaderMetricsHandle {
    metrics: Arc<ReaderMetrics>,
}

impl MetricsProvider for ReaderMetricsHandle {
    fn component(&self) -> &'static str {
        "reader"
    }

    fn dump(&self) -> Vec<(String, String)> {
        vec![
            ("in.records".into(), self.metrics.in_records.get().to_string()),
            ("in.bytes".into(), self.metrics.in_bytes.get().to_string()),
            ("in.errors".into(), self.metrics.in_errors.get().to_string()),
            (
                "append.errors".into(),
                self.metrics.append_errors.get().to_string(),
            ),
        ]
    }
}

/// Reads lines from standard input and appends validated records to the
/// queue
///
/// Generic over the reader so tests can drive it with in-memory input;
/// production wires it to buffered `tokio::io::stdin()`.
pub struct StdinSource<R> {
    reader: R,
    queue: Queue,
    decoder: CharsetDecoder,
    cancel: CancellationToken,
    reader_done: CancellationToken,
    metrics: Arc<ReaderMetrics>,
}

impl<R: AsyncBufRead + Unpin> StdinSource<R> {
    /// Create a new source
    ///
    /// `cancel` is the process-wide shutdown surface; `reader_done` is
    /// triggered by this source at end of input so the batcher knows no
    /// further records will arrive.
    pub fn new(
        reader: R,
        queue: Queue,
        config: StdinConfig,
        cancel: CancellationToken,
        reader_done: CancellationToken,
    ) -> Result<Self, SourceError> {
        let decoder = CharsetDecoder::new(&config.input_charset)?;
        Ok(Self {
            reader,
            queue,
            decoder,
            cancel,
            reader_done,
            metrics: Arc::new(ReaderMetrics::default()),
        })
    }

    /// Get a metrics handle for the process-wide dump
    pub fn metrics_handle(&self) -> ReaderMetricsHandle {
        ReaderMetricsHandle {
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Run until end of input or shutdown
    ///
    /// Every line is handled synchronously: the record is durable in the
    /// queue (or counted as dropped) before the next line is read.
    pub async fn run(mut self) {
        tracing::info!(charset = self.decoder.name(), "reader starting");

        let mut line = Vec::new();
        loop {
            line.clear();
            let read = tokio::select! {
                read = self.reader.read_until(b'\n', &mut line) => read,
                _ = self.cancel.cancelled() => break,
            };
            match read {
                Ok(0) => {
                    tracing::info!("end of input reached");
                    break;
                }
                Ok(n) => {
                    self.metrics.in_bytes.add(n as u64);
                    self.handle_line(&line);
                }
                Err(e) => {
                    tracing::error!(error = %e, "cannot read input");
                    self.metrics.in_errors.inc();
                }
            }
        }

        self.reader_done.cancel();
        tracing::info!(
            records = self.metrics.in_records.get(),
            bytes = self.metrics.in_bytes.get(),
            errors = self.metrics.in_errors.get(),
            "reader stopping"
        );
    }

    fn handle_line(&self, raw: &[u8]) {
        let trimmed = trim_line(raw);
        if trimmed.is_empty() {
            return;
        }

        let text: Cow<'_, str> = match std::str::from_utf8(trimmed) {
            Ok(s) => Cow::Borrowed(s),
            Err(_) => match self.decoder.decode(trimmed) {
                Ok(s) => Cow::Owned(s),
                Err(e) => {
                    tracing::warn!(error = %e, line = ?String::from_utf8_lossy(trimmed), "dropping unconvertible line");
                    self.metrics.in_errors.inc();
                    return;
                }
            },
        };

        let input = match InputRecord::parse(&text) {
            Ok(input) => input,
            Err(e) => {
                tracing::error!(error = %e, line = %text, "dropping invalid line");
                self.metrics.in_errors.inc();
                return;
            }
        };

        let record = match input.into_record(generate_id) {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(error = %e, line = %text, "dropping malformed record");
                self.metrics.in_errors.inc();
                return;
            }
        };

        match self.queue.append(&record) {
            Ok(key) => {
                self.metrics.in_records.inc();
                tracing::trace!(key, id = %record.id, "record enqueued");
            }
            Err(e) => {
                tracing::error!(error = %e, id = %record.id, "could not enqueue record");
                self.metrics.append_errors.inc();
            }
        }
    }
}

/// Strip the trailing newline and surrounding blanks
fn trim_line(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b' ' | b'\t' | b'\n' | b'\r') {
        end -= 1;
    }
    &raw[..end]
}

/// Time-ordered unique id for records that arrive without one
fn generate_id() -> String {
    URL_SAFE_NO_PAD.encode(Uuid::now_v7().as_bytes())
}

#[cfg(test)]
#[path = "stdin_test.rs"]
mod stdin_test;
