//! Source error types

/// Errors from the input side of the pipeline
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The configured fallback charset label is unknown
    #[error("unknown charset label: {0:?}")]
    UnknownCharset(String),

    /// The fallback decoder refused the input line
    #[error("could not convert input from {charset} to UTF-8")]
    Conversion { charset: &'static str },
}
