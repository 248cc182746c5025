//! Text extraction from raw document bytes.

use crate::error::ExtractionError;
use crate::utils::normalize;

/// Turns raw document bytes into normalized text.
pub trait Extractor: Send + Sync {
    fn extract(&self, content: &[u8]) -> Result<String, ExtractionError>;
}

/// Extractor for UTF-8 plain text and Markdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextExtractor;

impl Extractor for PlainTextExtractor {
    fn extract(&self, content: &[u8]) -> Result<String, ExtractionError> {
        if content.contains(&0) {
            return Err(ExtractionError::Binary);
        }
        let text = std::str::from_utf8(content)
            .map_err(|e| ExtractionError::InvalidEncoding(e.to_string()))?;
        Ok(normalize(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_and_normalizes() {
        let text = PlainTextExtractor
            .extract(b"\xef\xbb\xbfTitle\r\n\r\n\r\nBody   text")
            .unwrap();
        assert_eq!(text, "Title\n\nBody text");
    }

    #[test]
    fn test_rejects_binary() {
        assert!(matches!(
            PlainTextExtractor.extract(b"PK\x03\x04\x00\x00"),
            Err(ExtractionError::Binary)
        ));
    }

    #[test]
    fn test_rejects_invalid_utf8() {
        assert!(matches!(
            PlainTextExtractor.extract(&[0xff, 0xfe, 0x41]),
            Err(ExtractionError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn test_empty_input_yields_empty_text() {
        assert_eq!(PlainTextExtractor.extract(b"   ").unwrap(), "");
    }
}
