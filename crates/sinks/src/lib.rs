//! Stevedore - Sinks
//!
//! The delivery side of the pipeline: receives bulk bodies from the batcher
//! and POSTs them to a pool of ElasticSearch-compatible backends.
//!
//! ```text
//! [Batcher] --IndexedBatch--> [ElasticSink] --POST /_bulk--> [BackendPool urls]
//!                                   │
//!                                   └── drop_first(n) on the queue (ack)
//! ```
//!
//! # Failure handling
//!
//! - Network errors and 5xx replies are transient: the backend is parked
//!   with exponential backoff and the body retried on another one
//! - A 400 reply means at least one record in the body is malformed: the
//!   body is recursively bisected until the offenders are isolated, logged,
//!   and acknowledged away
//! - Other 4xx replies are permanent: no ack, no retry loop - the operator
//!   has to intervene
//! - Item-level errors inside a 2xx reply are logged per id and still
//!   acknowledged; ES rejected those documents permanently and retrying
//!   would loop

mod elastic;
mod pool;

pub use elastic::{ElasticConfig, ElasticError, ElasticSink, SinkMetricsHandle};
pub use pool::{backoff_delay, BackendPool, BackendUrl, BackoffConfig};
