//! Query-side models: requests, retrieval results, context blocks, answers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Output format for CLI results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// Machine-parseable JSON format
    Json,
    /// Documentation-friendly Markdown format
    Markdown,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            _ => Err(format!("unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

/// Per-request overrides. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryParams {
    pub top_k: Option<usize>,
    pub similarity_threshold: Option<f32>,
    pub token_budget: Option<usize>,
}

impl QueryParams {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.token_budget = Some(budget);
        self
    }
}

/// A query with its parameters resolved against configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
    pub similarity_threshold: f32,
}

/// One index hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub sequence: u32,
    pub score: f32,
}

/// A retrieved passage with its content, ranked by similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedPassage {
    pub chunk_id: Uuid,
    pub document_id: String,
    pub sequence: u32,
    pub score: f32,
    pub text: String,
    pub token_count: u32,
}

/// Ranked, deduplicated passages for one query. Empty is a valid result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub passages: Vec<RankedPassage>,
    pub duration_ms: u64,
}

impl RetrievalResult {
    pub fn empty(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }
}

/// Where a passage sits inside a formatted context, for attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPassage {
    pub chunk_id: Uuid,
    pub document_id: String,
    pub sequence: u32,
    pub score: f32,
    pub token_count: usize,
    /// Byte range of the passage text within `ContextBlock::text`.
    pub start: usize,
    pub end: usize,
    pub truncated: bool,
}

/// Passages packed under a token budget. `total_tokens` never exceeds the
/// budget the block was assembled for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextBlock {
    pub passages: Vec<ContextPassage>,
    pub total_tokens: usize,
    pub budget: usize,
    pub text: String,
}

impl ContextBlock {
    pub fn empty(budget: usize) -> Self {
        Self {
            budget,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    /// Text of the passage at `index`, sliced out of the formatted block.
    pub fn passage_text(&self, index: usize) -> Option<&str> {
        self.passages
            .get(index)
            .and_then(|p| self.text.get(p.start..p.end))
    }
}

/// Final answer to a question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    /// True when no passage cleared the similarity threshold and the
    /// generation provider was not consulted.
    pub insufficient_information: bool,
    pub context: ContextBlock,
    pub duration_ms: u64,
}
