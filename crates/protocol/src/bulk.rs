//! Bulk body framing and the offset-indexed batch buffer
//!
//! The `_bulk` endpoint takes newline-delimited JSON: for every record an
//! action header line followed by the raw document line:
//!
//! ```text
//! {"index":{"_index":"logs-2021.01.01","_type":"log","_id":"a"}}
//! {"x":1}
//! ```
//!
//! [`IndexedBatch`] keeps the concatenated frames plus the end offset of
//! every record, so the dispatcher can slice out any contiguous record range
//! without re-serializing - the core of 400-bisection.

use std::collections::HashMap;

use serde::Serialize;

use crate::{ProtocolError, Record, RECORD_CAPACITY_HINT};

#[derive(Serialize)]
struct ActionHeader<'a> {
    index: ActionOp<'a>,
}

#[derive(Serialize)]
struct ActionOp<'a> {
    #[serde(rename = "_index")]
    index: String,
    #[serde(rename = "_type")]
    doc_type: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// Builds wire frames for one configured index prefix and document type
#[derive(Debug, Clone)]
pub struct BulkFramer {
    index_prefix: String,
    doc_type: String,
}

impl BulkFramer {
    pub fn new(index_prefix: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            index_prefix: index_prefix.into(),
            doc_type: doc_type.into(),
        }
    }

    /// Produce the two-line frame for one record
    ///
    /// The destination index is `<prefix>-<suffix>`; the document bytes are
    /// appended verbatim.
    pub fn frame(&self, record: &Record) -> Result<Vec<u8>, ProtocolError> {
        let header = ActionHeader {
            index: ActionOp {
                index: format!("{}-{}", self.index_prefix, record.suffix),
                doc_type: &self.doc_type,
                id: &record.id,
            },
        };
        let mut out = serde_json::to_vec(&header)?;
        out.push(b'\n');
        out.extend_from_slice(record.document.get().as_bytes());
        out.push(b'\n');
        Ok(out)
    }
}

/// An append-only bulk body with per-record boundary offsets
///
/// Single-writer: the batcher appends frames in queue order, then the
/// dispatcher only reads. `slice(i, j)` returns the raw bytes spanning
/// records `i..j`; `by_id` resolves one record's bytes for error reporting.
#[derive(Debug)]
pub struct IndexedBatch {
    buf: Vec<u8>,
    ends: Vec<usize>,
    ids: HashMap<String, usize>,
}

impl IndexedBatch {
    /// Create a batch pre-sized for `records` entries
    pub fn with_capacity(records: usize) -> Self {
        Self {
            buf: Vec::with_capacity(records * RECORD_CAPACITY_HINT),
            ends: Vec::with_capacity(records),
            ids: HashMap::with_capacity(records),
        }
    }

    /// Append one framed record and mark its boundary
    pub fn append(&mut self, id: &str, frame: &[u8]) {
        self.buf.extend_from_slice(frame);
        self.ends.push(self.buf.len());
        self.ids.insert(id.to_string(), self.ends.len() - 1);
    }

    /// Number of records in the batch
    pub fn count(&self) -> usize {
        self.ends.len()
    }

    /// Total body size in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    fn pos_of(&self, i: usize) -> usize {
        if i == 0 {
            0
        } else {
            self.ends[i - 1]
        }
    }

    /// Raw bytes spanning records `i..j`
    ///
    /// # Panics
    ///
    /// Panics if `j > count()` or `i > j`.
    pub fn slice(&self, i: usize, j: usize) -> &[u8] {
        &self.buf[self.pos_of(i)..self.pos_of(j)]
    }

    /// Raw bytes of the record appended under `id`, if present
    pub fn by_id(&self, id: &str) -> Option<&[u8]> {
        let i = *self.ids.get(id)?;
        Some(self.slice(i, i + 1))
    }
}

#[cfg(test)]
#[path = "bulk_test.rs"]
mod bulk_test;
