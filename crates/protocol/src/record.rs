//! Record data model
//!
//! Input arrives on stdin as one JSON object per line:
//!
//! ```text
//! {"id":"<optional>","date":"YYYY.MM.DD","log":<any JSON value>}
//! ```
//!
//! [`InputRecord`] is the tolerant parse of that line; [`Record`] is the
//! validated, immutable form that the queue stores and the batcher frames.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::ProtocolError;

/// A validated log record
///
/// Immutable from queue-append onward. `document` is the raw JSON payload,
/// preserved byte-for-byte through storage and onto the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Unique document id, used as the bulk operation `_id`
    pub id: String,

    /// Date-like index suffix (e.g. `2016.05.21`), appended to the
    /// configured index prefix to form the destination index
    #[serde(rename = "date")]
    pub suffix: String,

    /// Raw JSON payload
    #[serde(rename = "log")]
    pub document: Box<RawValue>,
}

impl std::fmt::Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "id={:?} suffix={} doc={}",
            self.id,
            self.suffix,
            self.document.get()
        )
    }
}

/// The schema expected on stdin, before validation
///
/// All fields are optional at parse time so a single malformed line produces
/// one precise validation error instead of an opaque serde failure.
#[derive(Debug, Deserialize)]
pub struct InputRecord {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(rename = "date", default)]
    pub suffix: Option<String>,

    #[serde(rename = "log", default)]
    pub document: Option<Box<RawValue>>,
}

impl InputRecord {
    /// Parse one input line
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(line)?)
    }

    /// Validate and promote to a [`Record`]
    ///
    /// `generate_id` is invoked only when the input carried no id (or an
    /// empty one); the caller owns the id scheme.
    pub fn into_record(
        self,
        generate_id: impl FnOnce() -> String,
    ) -> Result<Record, ProtocolError> {
        let suffix = match self.suffix {
            Some(s) if !s.is_empty() => s,
            _ => return Err(ProtocolError::MissingSuffix),
        };
        let document = self.document.ok_or(ProtocolError::MissingDocument)?;
        let id = match self.id {
            Some(id) if !id.is_empty() => id,
            _ => generate_id(),
        };
        Ok(Record {
            id,
            suffix,
            document,
        })
    }
}

#[cfg(test)]
#[path = "record_test.rs"]
mod record_test;
