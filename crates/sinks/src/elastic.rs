//! ElasticSearch bulk dispatcher
//!
//! Delivers each batch body to exactly one backend, retrying transient
//! failures across the pool and bisecting on 400 replies. Acknowledgements
//! are prefix drops on the queue, issued strictly in queue order: the
//! in-order recursive traversal acks the left half of a bisection fully
//! before the right half begins.

use std::sync::Arc;
use std::time::Instant;

use reqwest::header::{ACCEPT, CONTENT_TYPE, EXPECT};
use reqwest::StatusCode;
use stevedore_metrics::{Counter, Histogram, MetricsProvider};
use stevedore_protocol::{BulkResponse, IndexedBatch};
use stevedore_queue::{Queue, QueueError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{BackendPool, BackoffConfig};

/// Configuration for the bulk dispatcher
#[derive(Debug, Clone)]
pub struct ElasticConfig {
    /// Backend hostnames
    pub hosts: Vec<String>,

    /// `http` or `https`
    pub protocol: String,

    /// Backend port
    pub port: u16,

    /// Basic-auth credentials
    pub username: Option<String>,
    pub password: Option<String>,

    /// Full pool traversals before a slice transmission gives up
    pub max_retries: usize,

    /// Per-backend backoff schedule
    pub backoff: BackoffConfig,
}

impl Default for ElasticConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["localhost".to_string()],
            protocol: "http".to_string(),
            port: 9200,
            username: None,
            password: None,
            max_retries: 5,
            backoff: BackoffConfig::default(),
        }
    }
}

impl ElasticConfig {
    /// Set basic-auth credentials
    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the retry budget
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The `_bulk` endpoint URL of every configured host
    pub fn bulk_urls(&self) -> Vec<String> {
        self.hosts
            .iter()
            .map(|host| format!("{}://{}:{}/_bulk", self.protocol, host, self.port))
            .collect()
    }
}

/// Errors from the dispatcher
#[derive(Debug, thiserror::Error)]
pub enum ElasticError {
    /// 400 reply: at least one record in the body is malformed
    #[error("bulk body rejected with status 400")]
    RejectedBatch,

    /// Non-400 4xx or top-level error object: no ack, no retry
    #[error("permanent backend error: {status} {reason}")]
    Permanent { status: u16, reason: String },

    /// Every backend kept failing until the retry budget ran out
    #[error("all backends failing, gave up after {tries} attempts: {last_error}")]
    RetriesExhausted { tries: usize, last_error: String },

    /// Shutdown interrupted the transmission; nothing was acknowledged
    #[error("shutting down")]
    ShuttingDown,

    /// Acknowledging on the queue failed
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// One classified transmission attempt
enum Outcome {
    /// 2xx, item errors (if any) already reported
    Success,
    /// HTTP 400
    Rejected,
    /// Other 4xx or a top-level error object in the reply
    Permanent { status: u16, reason: String },
    /// Network error or 5xx
    Transient { reason: String },
}

/// Dispatcher metrics
#[derive(Debug, Default)]
struct SinkMetrics {
    batches_received: Counter,
    requests: Counter,
    request_bytes: Counter,
    request_errors: Counter,
    status_2xx: Counter,
    status_400: Counter,
    status_4xx: Counter,
    status_5xx: Counter,
    network_errors: Counter,
    item_errors: Counter,
    rejected_records: Counter,
    acked_records: Counter,
    request_size: Histogram,
    request_time: Histogram,
    request_tries: Histogram,
}

/// Handle for accessing dispatcher metrics after `run()` consumed the sink
#[derive(Clone)]
pub struct SinkMetricsHandle {
    metrics: Arc<SinkMetrics>,
}

impl MetricsProvider for SinkMetricsHandle {
    fn component(&self) -> &'static str {
        "requests"
    }

    fn dump(&self) -> Vec<(String, String)> {
        let m = &self.metrics;
        vec![
            ("batches".into(), m.batches_received.get().to_string()),
            ("count".into(), m.requests.get().to_string()),
            ("bytes".into(), m.request_bytes.get().to_string()),
            ("errors".into(), m.request_errors.get().to_string()),
            ("status.2xx".into(), m.status_2xx.get().to_string()),
            ("status.400".into(), m.status_400.get().to_string()),
            ("status.4xx".into(), m.status_4xx.get().to_string()),
            ("status.5xx".into(), m.status_5xx.get().to_string()),
            ("status.network".into(), m.network_errors.get().to_string()),
            ("items.errors".into(), m.item_errors.get().to_string()),
            ("records.rejected".into(), m.rejected_records.get().to_string()),
            ("records.acked".into(), m.acked_records.get().to_string()),
            ("size".into(), m.request_size.snapshot().to_string()),
            ("time.us".into(), m.request_time.snapshot().to_string()),
            ("tries".into(), m.request_tries.snapshot().to_string()),
        ]
    }
}

/// Sends bulk bodies to the backend pool and acknowledges the queue
pub struct ElasticSink {
    receiver: mpsc::Receiver<IndexedBatch>,
    queue: Queue,
    pool: BackendPool,
    client: reqwest::Client,
    config: ElasticConfig,
    cancel: CancellationToken,
    metrics: Arc<SinkMetrics>,
}

impl ElasticSink {
    /// Create a new sink
    ///
    /// The pool is closed by the sink when its input channel ends.
    pub fn new(
        receiver: mpsc::Receiver<IndexedBatch>,
        queue: Queue,
        pool: BackendPool,
        config: ElasticConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            queue,
            pool,
            client: reqwest::Client::new(),
            config,
            cancel,
            metrics: Arc::new(SinkMetrics::default()),
        }
    }

    /// Get a metrics handle for the process-wide dump
    pub fn metrics_handle(&self) -> SinkMetricsHandle {
        SinkMetricsHandle {
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Run until the batch channel closes
    ///
    /// A batch that fails permanently is logged and left unacknowledged;
    /// its records stay in the queue for a later run.
    pub async fn run(mut self) {
        tracing::info!(
            hosts = ?self.config.hosts,
            protocol = %self.config.protocol,
            port = self.config.port,
            "elastic sink starting"
        );

        while let Some(batch) = self.receiver.recv().await {
            self.metrics.batches_received.inc();
            match self.send_slice(&batch, 0, batch.count()).await {
                Ok(()) => {}
                Err(ElasticError::ShuttingDown) => {
                    tracing::debug!("transmission abandoned for shutdown");
                }
                Err(e) => {
                    tracing::error!(error = %e, records = batch.count(), "batch delivery failed, records remain queued");
                }
            }
        }

        self.pool.close();
        tracing::info!(
            batches = self.metrics.batches_received.get(),
            requests = self.metrics.requests.get(),
            acked = self.metrics.acked_records.get(),
            "elastic sink shutting down"
        );
    }

    /// Deliver records `i..j`, bisecting on 400 replies
    ///
    /// Acks happen in queue order: a slice is acknowledged on success, and
    /// in a bisection the left half completes before the right half starts.
    async fn send_slice(&self, batch: &IndexedBatch, i: usize, j: usize) -> Result<(), ElasticError> {
        if i >= j {
            return Ok(());
        }
        tracing::debug!(from = i, to = j, "sending slice");
        match self.transmit(batch, i, j).await {
            Ok(()) => {
                self.ack(j - i)?;
                Ok(())
            }
            Err(ElasticError::RejectedBatch) if j - i == 1 => {
                tracing::error!(
                    body = %String::from_utf8_lossy(batch.slice(i, j)),
                    "record rejected by backend"
                );
                self.metrics.rejected_records.inc();
                self.ack(1)?;
                Ok(())
            }
            Err(ElasticError::RejectedBatch) => {
                let mid = (i + j) / 2;
                tracing::debug!(from = i, mid, to = j, "bisecting rejected slice");
                Box::pin(self.send_slice(batch, i, mid)).await?;
                Box::pin(self.send_slice(batch, mid, j)).await
            }
            Err(e) => Err(e),
        }
    }

    fn ack(&self, n: usize) -> Result<(), ElasticError> {
        let dropped = self.queue.drop_first(n)?;
        self.metrics.acked_records.add(dropped as u64);
        tracing::debug!(records = n, dropped, "records acknowledged");
        Ok(())
    }

    /// Transmit one body, rotating through the pool on transient failures
    async fn transmit(&self, batch: &IndexedBatch, i: usize, j: usize) -> Result<(), ElasticError> {
        let body = batch.slice(i, j);
        let budget = self.config.hosts.len().max(1) * self.config.max_retries.max(1);
        let mut last_error = String::new();

        for tries in 1..=budget {
            // An already-available backend still wins over an in-progress
            // shutdown, so the final partial batch gets its chance.
            let url = tokio::select! {
                biased;
                url = self.pool.acquire() => match url {
                    Some(url) => url,
                    None => return Err(ElasticError::ShuttingDown),
                },
                _ = self.cancel.cancelled() => return Err(ElasticError::ShuttingDown),
            };

            match self.send_to(url.url(), body, batch).await {
                Outcome::Success => {
                    self.metrics.request_tries.record(tries as u64);
                    self.pool.release(url, false);
                    return Ok(());
                }
                Outcome::Rejected => {
                    self.metrics.request_tries.record(tries as u64);
                    self.pool.release(url, false);
                    return Err(ElasticError::RejectedBatch);
                }
                Outcome::Permanent { status, reason } => {
                    self.metrics.request_tries.record(tries as u64);
                    tracing::error!(url = %url, status, reason = %reason, "backend replied with an error, bailing out");
                    self.pool.release(url, false);
                    return Err(ElasticError::Permanent { status, reason });
                }
                Outcome::Transient { reason } => {
                    tracing::error!(url = %url, error = %reason, "backend failing, trying another");
                    last_error = reason;
                    self.pool.release(url, true);
                }
            }
        }

        Err(ElasticError::RetriesExhausted {
            tries: budget,
            last_error,
        })
    }

    /// POST one body to one backend and classify the reply
    async fn send_to(&self, url: &str, body: &[u8], batch: &IndexedBatch) -> Outcome {
        tracing::debug!(url, bytes = body.len(), "sending bulk request");

        let mut request = self
            .client
            .post(url)
            .header(EXPECT, "100-continue")
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(body.to_vec());
        if let Some(username) = &self.config.username {
            request = request.basic_auth(username, self.config.password.as_deref());
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.metrics.network_errors.inc();
                self.metrics.request_errors.inc();
                return Outcome::Transient {
                    reason: e.to_string(),
                };
            }
        };
        self.metrics.request_time.record_duration(started.elapsed());
        self.metrics.requests.inc();
        self.metrics.request_size.record(body.len() as u64);
        self.metrics.request_bytes.add(body.len() as u64);

        let status = response.status();
        let decoded = self.decode_body(response).await;

        if status.is_success() {
            self.metrics.status_2xx.inc();
            if let Some(reply) = &decoded {
                if let Some(error) = &reply.error {
                    self.metrics.request_errors.inc();
                    return Outcome::Permanent {
                        status: reply.status.unwrap_or(status.as_u16()),
                        reason: error.to_string(),
                    };
                }
                self.report_item_failures(batch, reply);
            }
            return Outcome::Success;
        }

        self.metrics.request_errors.inc();
        let reason = decoded
            .as_ref()
            .and_then(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string());

        if status == StatusCode::BAD_REQUEST {
            self.metrics.status_400.inc();
            Outcome::Rejected
        } else if status.is_client_error() {
            self.metrics.status_4xx.inc();
            Outcome::Permanent {
                status: status.as_u16(),
                reason,
            }
        } else {
            self.metrics.status_5xx.inc();
            Outcome::Transient {
                reason: format!("{} {}", status.as_u16(), reason),
            }
        }
    }

    /// Decode a JSON reply body, tolerating other content types
    async fn decode_body(&self, response: reqwest::Response) -> Option<BulkResponse> {
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if !is_json {
            tracing::debug!("reply is not JSON, skipping per-item parsing");
            return None;
        }
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "could not read reply body");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::error!(error = %e, "could not parse reply body");
                None
            }
        }
    }

    /// Log every item ES rejected inside a successful reply
    ///
    /// Those documents are still acknowledged: the rejection is a permanent
    /// schema or validation decision and retrying would loop.
    fn report_item_failures(&self, batch: &IndexedBatch, reply: &BulkResponse) {
        for op in reply.item_statuses() {
            if !op.is_error() {
                continue;
            }
            self.metrics.item_errors.inc();
            let data = batch
                .by_id(&op.id)
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default();
            match &op.error {
                Some(error) => {
                    tracing::warn!(id = %op.id, error = %error, data = %data, "backend rejected item")
                }
                None => {
                    tracing::warn!(id = %op.id, status = op.status, data = %data, "backend rejected item")
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "elastic_test.rs"]
mod elastic_test;
