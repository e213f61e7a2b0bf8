//! Decoded `_bulk` reply
//!
//! The reply shape is:
//!
//! ```text
//! {"took":<int>,"error":<optional>,"items":[{"index":{"_id":...,"status":...,"error":...}}, ...]}
//! ```
//!
//! A top-level `error` condemns the whole batch; per-item errors identify
//! documents ES rejected permanently inside an otherwise successful reply.

use serde::Deserialize;

/// The decoded reply body of a bulk request
#[derive(Debug, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: Option<u64>,

    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub error: Option<EsError>,

    #[serde(default)]
    pub items: Option<Vec<BulkItem>>,
}

impl BulkResponse {
    /// Iterate the per-item operation statuses, whichever op key they use
    pub fn item_statuses(&self) -> impl Iterator<Item = &OpStatus> {
        self.items
            .iter()
            .flatten()
            .filter_map(|item| item.status())
    }
}

/// One entry of the `items` array; ES keys it by the operation type
#[derive(Debug, Default, Deserialize)]
pub struct BulkItem {
    #[serde(default)]
    pub index: Option<OpStatus>,

    #[serde(default)]
    pub create: Option<OpStatus>,
}

impl BulkItem {
    /// The status object, preferring `create` over `index` when both appear
    pub fn status(&self) -> Option<&OpStatus> {
        self.create.as_ref().or(self.index.as_ref())
    }
}

/// Status of one bulk operation
#[derive(Debug, Default, Deserialize)]
pub struct OpStatus {
    #[serde(rename = "_id", default)]
    pub id: String,

    #[serde(default)]
    pub status: Option<u16>,

    #[serde(default)]
    pub error: Option<EsError>,
}

impl OpStatus {
    /// Whether ES rejected this operation
    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.status.is_some_and(|s| s >= 400)
    }
}

/// An ES error object, with its recursive cause chain
#[derive(Debug, Deserialize)]
pub struct EsError {
    #[serde(default)]
    pub reason: Option<String>,

    #[serde(rename = "caused_by", default)]
    pub caused_by: Option<Box<EsError>>,
}

impl std::fmt::Display for EsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason.as_deref().unwrap_or("unknown error"))?;
        if let Some(cause) = &self.caused_by {
            write!(f, ", cause: {cause}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "response_test.rs"]
mod response_test;
