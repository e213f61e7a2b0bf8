//! Stevedore - Pipeline
//!
//! The batching aggregator between the queue and the dispatcher.
//!
//! ```text
//! [Queue peek stream] --> [Batcher] --IndexedBatch--> [Dispatcher channel]
//! ```
//!
//! The batcher coalesces records into one bulk body per batch under dual
//! triggers: a maximum record count and a maximum inter-flush delay. While
//! a full batch waits on the downstream channel the batcher does not
//! consume from the queue, which is the pipeline's backpressure.

mod batcher;

pub use batcher::{Batcher, BatcherConfig, BatcherMetricsHandle};
