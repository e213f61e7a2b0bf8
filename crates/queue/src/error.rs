//! Queue error types

/// Errors from the persistent queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The underlying store failed; repeated occurrences are fatal for the
    /// process
    #[error("queue store error: {0}")]
    Store(#[from] fjall::Error),

    /// The record could not be encoded for storage; the record is rejected
    /// and the caller informed
    #[error("could not encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_display() {
        let inner = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = QueueError::Encode(inner);
        assert!(err.to_string().starts_with("could not encode record"));
    }
}
