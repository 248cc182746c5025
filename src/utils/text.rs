//! Text normalization and token accounting.
//!
//! A token is a maximal run of non-whitespace characters. The chunker, the
//! context assembler and the prompt budget checks all count with the same
//! rule, so token counts stored on chunks add up exactly in a context block.

use std::sync::LazyLock;

use regex::Regex;

static HORIZONTAL_WS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").expect("valid regex"));
static PADDED_NEWLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" ?\n ?").expect("valid regex"));
static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Normalize extracted text: unify line endings, drop control characters,
/// collapse horizontal whitespace and runs of blank lines, trim the ends.
pub fn normalize(text: &str) -> String {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let cleaned: String = unified
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();
    let collapsed = HORIZONTAL_WS.replace_all(&cleaned, " ");
    let collapsed = PADDED_NEWLINE.replace_all(&collapsed, "\n");
    let collapsed = BLANK_LINES.replace_all(&collapsed, "\n\n");
    collapsed.trim().to_string()
}

/// Byte ranges of every token in `text`.
pub fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = None;
    for (idx, ch) in text.char_indices() {
        match (ch.is_whitespace(), start) {
            (false, None) => start = Some(idx),
            (true, Some(s)) => {
                spans.push((s, idx));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }
    spans
}

/// Number of tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Keep at most `max_tokens` tokens of `text`, preserving the original
/// spacing between the kept tokens.
pub fn truncate_tokens(text: &str, max_tokens: usize) -> &str {
    if max_tokens == 0 {
        return "";
    }
    let spans = token_spans(text);
    if spans.len() > max_tokens {
        &text[spans[0].0..spans[max_tokens - 1].1]
    } else {
        text.trim()
    }
}
