//! Stevedore - Sources
//!
//! The input side of the pipeline: reads one JSON record per line from
//! standard input, validates it, assigns an id when absent, and appends it
//! to the persistent queue.
//!
//! ```text
//! stdin --lines--> [StdinSource] --append--> [Queue]
//! ```
//!
//! Lines that are not valid UTF-8 are decoded from a configured fallback
//! charset before parsing. Malformed lines are dropped with a logged
//! warning and an error counter increment; the stream keeps going.

mod charset;
mod error;
mod stdin;

pub use charset::CharsetDecoder;
pub use error::SourceError;
pub use stdin::{ReaderMetricsHandle, StdinConfig, StdinSource};

/// Result type for source operations
pub type Result<T> = std::result::Result<T, SourceError>;
