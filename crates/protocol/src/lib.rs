//! Stevedore - Protocol
//!
//! Core types that flow through the pipeline:
//! - [`Record`] / [`InputRecord`] - the unit of input, as stored and as parsed
//! - [`BulkFramer`] - builds the two-line action/document frame of the
//!   ElasticSearch `_bulk` wire format
//! - [`IndexedBatch`] - an append-only bulk body with per-record offsets,
//!   sliceable for 400-bisection
//! - [`BulkResponse`] - the decoded `_bulk` reply, including per-item errors
//!
//! # Design Principles
//!
//! - **Byte fidelity**: the raw `document` payload is carried as
//!   `serde_json::value::RawValue` and is never re-encoded, so the bytes
//!   that arrived on stdin are the bytes that go on the wire
//! - **Single-writer batches**: an [`IndexedBatch`] is filled once by the
//!   batcher, then read-only while the dispatcher slices it

mod bulk;
mod error;
mod record;
mod response;

pub use bulk::{BulkFramer, IndexedBatch};
pub use error::ProtocolError;
pub use record::{InputRecord, Record};
pub use response::{BulkItem, BulkResponse, EsError, OpStatus};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Default number of records per batch before flush
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Per-record buffer capacity hint used when pre-allocating batch bodies
pub const RECORD_CAPACITY_HINT: usize = 1024;
