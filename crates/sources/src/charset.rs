//! Fallback charset decoding for non-UTF-8 input lines

use encoding_rs::Encoding;

use crate::SourceError;

/// Decodes lines from the configured fallback charset to UTF-8
///
/// Input is expected to be UTF-8; this decoder is only consulted when a
/// line fails UTF-8 validation. Labels follow the WHATWG encoding registry
/// (`ISO-8859-1`, `windows-1252`, `shift_jis`, ...).
#[derive(Debug, Clone, Copy)]
pub struct CharsetDecoder {
    encoding: &'static Encoding,
}

impl CharsetDecoder {
    /// Resolve a charset label
    pub fn new(label: &str) -> Result<Self, SourceError> {
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| SourceError::UnknownCharset(label.to_string()))?;
        Ok(Self { encoding })
    }

    /// Name of the resolved encoding
    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// Decode one line to UTF-8
    ///
    /// Refuses input containing byte sequences invalid in the fallback
    /// charset rather than silently substituting replacement characters.
    pub fn decode(&self, line: &[u8]) -> Result<String, SourceError> {
        let (text, had_errors) = self.encoding.decode_without_bom_handling(line);
        if had_errors {
            return Err(SourceError::Conversion {
                charset: self.encoding.name(),
            });
        }
        Ok(text.into_owned())
    }
}
