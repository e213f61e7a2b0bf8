//! Stevedore - Queue
//!
//! Durable, ordered, crash-safe buffer between the stdin reader and the
//! batcher, decoupling burst ingest from backend availability.
//!
//! # Design
//!
//! Records live in one ordered partition of an embedded LSM keyspace. Keys
//! are 8-byte big-endian `u64`, so lexicographic order equals numeric order
//! and a prefix delete is a range of the smallest keys. Three independent
//! lanes operate on the store concurrently:
//!
//! ```text
//! Reader ──append──► [records partition] ──peek──► Batcher
//!                          ▲
//!                          └──drop_first(n)── Dispatcher (on ack)
//! ```
//!
//! - `append` allocates the next key from an in-memory counter seeded by a
//!   max-key scan at open; no gap reuse
//! - `peek` is a non-destructive cursor: each step opens a fresh snapshot
//!   past the cursor, and on reaching the tail sleeps up to the configured
//!   flush delay before retrying
//! - `drop_first(n)` removes the first `n` keys in one atomic write batch
//!
//! At-least-once delivery across restarts follows directly: a record is
//! deleted only after the dispatcher confirms downstream acceptance, so an
//! interrupted run leaves every unacknowledged record in the store.

mod error;
mod queue;

pub use error::QueueError;
pub use queue::{PeekStream, Queue, QueueConfig, QueueMetricsHandle};

/// Result type for queue operations
pub type Result<T> = std::result::Result<T, QueueError>;
