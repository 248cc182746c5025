//! Token-window chunking with overlap.

use crate::error::ChunkingError;
use crate::models::ChunkingConfig;
use crate::utils::token_spans;

/// One chunk of a document's normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub sequence: u32,
    pub text: String,
    pub token_count: usize,
    /// Byte offsets into the normalized text.
    pub start: usize,
    pub end: usize,
}

/// Text chunker that splits documents into overlapping windows of tokens.
#[derive(Debug, Clone)]
pub struct TextChunker {
    chunk_tokens: usize,
    overlap_tokens: usize,
    min_chunk_tokens: usize,
}

impl TextChunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self, ChunkingError> {
        if config.chunk_tokens == 0 {
            return Err(ChunkingError::InvalidParameters(
                "chunk_tokens must be positive".into(),
            ));
        }
        if config.overlap_tokens >= config.chunk_tokens {
            return Err(ChunkingError::InvalidParameters(format!(
                "overlap ({}) must be smaller than chunk size ({})",
                config.overlap_tokens, config.chunk_tokens
            )));
        }
        if config.min_chunk_tokens > config.chunk_tokens {
            return Err(ChunkingError::InvalidParameters(format!(
                "minimum chunk size ({}) exceeds chunk size ({})",
                config.min_chunk_tokens, config.chunk_tokens
            )));
        }
        Ok(Self {
            chunk_tokens: config.chunk_tokens,
            overlap_tokens: config.overlap_tokens,
            min_chunk_tokens: config.min_chunk_tokens,
        })
    }

    /// Split normalized `text` into ordered, overlapping chunks.
    ///
    /// Every chunk except the last holds at least `min_chunk_tokens` tokens
    /// and at most `chunk_tokens`.
    pub fn chunk(&self, text: &str) -> Result<Vec<ChunkSpan>, ChunkingError> {
        let spans = token_spans(text);
        if spans.is_empty() {
            return Err(ChunkingError::EmptyInput);
        }

        let total = spans.len();
        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let target_end = (start + self.chunk_tokens).min(total);
            let end = if target_end == total {
                total
            } else {
                self.find_break_point(text, &spans, start, target_end)
            };

            let byte_start = spans[start].0;
            let byte_end = spans[end - 1].1;
            chunks.push(ChunkSpan {
                sequence: chunks.len() as u32,
                text: text[byte_start..byte_end].to_string(),
                token_count: end - start,
                start: byte_start,
                end: byte_end,
            });

            if end == total {
                break;
            }
            // The overlap never rewinds past the previous start.
            start = end.saturating_sub(self.overlap_tokens).max(start + 1);
        }

        Ok(chunks)
    }

    /// Pick a chunk end (exclusive token index) within the last 20% of the
    /// window: a paragraph break if there is one, then a sentence end, else
    /// the full window.
    fn find_break_point(
        &self,
        text: &str,
        spans: &[(usize, usize)],
        start: usize,
        target_end: usize,
    ) -> usize {
        let window = target_end - start;
        let earliest = (start + window - window / 5)
            .max(start + self.min_chunk_tokens)
            .max(start + 1);

        let mut last_sentence = None;
        for end in (earliest..=target_end).rev() {
            let (_, token_end) = spans[end - 1];
            let gap_end = spans.get(end).map_or(text.len(), |s| s.0);
            let gap = &text[token_end..gap_end];
            if gap.contains("\n\n") {
                return end;
            }
            if last_sentence.is_none()
                && text[..token_end].ends_with(['.', '!', '?'])
            {
                last_sentence = Some(end);
            }
        }
        last_sentence.unwrap_or(target_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::count_tokens;

    fn chunker(chunk_tokens: usize, overlap_tokens: usize, min_chunk_tokens: usize) -> TextChunker {
        TextChunker::new(&ChunkingConfig {
            chunk_tokens,
            overlap_tokens,
            min_chunk_tokens,
        })
        .unwrap()
    }

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_small_document_single_chunk() {
        let chunks = chunker(200, 40, 20).chunk("Hello, world!").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].sequence, 0);
        assert_eq!(chunks[0].token_count, 2);
    }

    #[test]
    fn test_empty_document() {
        let chunker = chunker(200, 40, 20);
        assert!(matches!(chunker.chunk(""), Err(ChunkingError::EmptyInput)));
        assert!(matches!(chunker.chunk("  \n\t "), Err(ChunkingError::EmptyInput)));
    }

    #[test]
    fn test_chunking_preserves_overlap() {
        let text = words(25);
        let chunks = chunker(10, 3, 2).chunk(&text).unwrap();

        // Windows start at 0, 7, 14, 21.
        assert_eq!(chunks.len(), 4);
        for pair in chunks.windows(2) {
            let prev: Vec<&str> = pair[0].text.split_whitespace().collect();
            let next: Vec<&str> = pair[1].text.split_whitespace().collect();
            assert_eq!(&prev[prev.len() - 3..], &next[..3]);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, i as u32);
            assert_eq!(count_tokens(&chunk.text), chunk.token_count);
            assert_eq!(&text[chunk.start..chunk.end], chunk.text);
        }
        assert!(chunks.last().unwrap().text.ends_with("w24"));
    }

    #[test]
    fn test_chunks_respect_size_bounds() {
        let text = words(503);
        let chunks = chunker(50, 10, 20).chunk(&text).unwrap();
        let (last, rest) = chunks.split_last().unwrap();
        for chunk in rest {
            assert!(chunk.token_count <= 50);
            assert!(chunk.token_count >= 20);
        }
        assert!(last.token_count <= 50);
    }

    #[test]
    fn test_prefers_sentence_break_near_window_end() {
        let text = "one two three four five six seven eight. nine ten eleven twelve";
        let chunks = chunker(10, 2, 1).chunk(text).unwrap();
        assert!(chunks[0].text.ends_with("eight."));
        assert_eq!(chunks[0].token_count, 8);
    }

    #[test]
    fn test_prefers_paragraph_break() {
        let text = "a b c d e f g h. i\n\nj k l m n o p q r s t";
        let chunks = chunker(10, 0, 1).chunk(text).unwrap();
        assert_eq!(chunks[0].text, "a b c d e f g h. i");
        assert!(chunks[1].text.starts_with('j'));
    }

    #[test]
    fn test_rejects_invalid_parameters() {
        let config = ChunkingConfig {
            chunk_tokens: 10,
            overlap_tokens: 10,
            min_chunk_tokens: 1,
        };
        assert!(matches!(
            TextChunker::new(&config),
            Err(ChunkingError::InvalidParameters(_))
        ));
    }
}
