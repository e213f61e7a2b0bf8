//! Protocol error types

/// Errors from record parsing, validation, and framing
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Input line is not valid JSON
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Input record has no usable `date` field
    #[error("missing or empty date field")]
    MissingSuffix,

    /// Input record has no `log` field
    #[error("missing log field")]
    MissingDocument,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            ProtocolError::MissingSuffix.to_string(),
            "missing or empty date field"
        );
        assert_eq!(
            ProtocolError::MissingDocument.to_string(),
            "missing log field"
        );
    }

    #[test]
    fn test_json_error_wraps_source() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let wrapped = ProtocolError::from(err);
        assert!(wrapped.to_string().starts_with("invalid JSON"));
    }
}
