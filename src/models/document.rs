use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a document inside the ingestion pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Received,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Available,
    Error,
    Deleted,
}

impl DocumentStatus {
    /// Terminal states are the ones a pipeline run ends in.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DocumentStatus::Available | DocumentStatus::Error | DocumentStatus::Deleted
        )
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        match (self, next) {
            (Received, Extracting)
            | (Extracting, Chunking)
            | (Chunking, Embedding)
            | (Embedding, Indexing)
            | (Indexing, Available) => true,
            // Reprocessing re-enters at extraction.
            (Available | Error, Extracting) => true,
            (from, Error) => !from.is_terminal(),
            (Available | Error, Deleted) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Received => "received",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Indexing => "indexing",
            DocumentStatus::Available => "available",
            DocumentStatus::Error => "error",
            DocumentStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "received" => DocumentStatus::Received,
            "extracting" => DocumentStatus::Extracting,
            "chunking" => DocumentStatus::Chunking,
            "embedding" => DocumentStatus::Embedding,
            "indexing" => DocumentStatus::Indexing,
            "available" => DocumentStatus::Available,
            "error" => DocumentStatus::Error,
            "deleted" => DocumentStatus::Deleted,
            other => return Err(format!("unknown document status: {other}")),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub checksum: String,
    pub status: DocumentStatus,
    /// Cause of the last failure, set together with `DocumentStatus::Error`.
    pub error: Option<String>,
    /// Latest chunk generation attempted for this document.
    pub generation: u32,
    /// Generation whose chunks are currently searchable.
    pub live_generation: Option<u32>,
    pub chunk_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn checksum(content: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        hex::encode(Sha256::digest(content))
    }

    pub fn new(id: impl Into<String>, content: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            checksum: Self::checksum(&content),
            content,
            status: DocumentStatus::Received,
            error: None,
            generation: 0,
            live_generation: None,
            chunk_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A document contributes to search results while one of its chunk
    /// generations is live and it has not been deleted.
    pub fn is_searchable(&self) -> bool {
        self.live_generation.is_some() && self.status != DocumentStatus::Deleted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: String,
    /// Chunk generation; increases every time the document is reprocessed.
    pub generation: u32,
    /// Position of the chunk within its document.
    pub sequence: u32,
    pub text: String,
    pub token_count: u32,
    pub start_offset: u64,
    pub end_offset: u64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn generate_id(document_id: &str, generation: u32, sequence: u32) -> Uuid {
        let name = format!("{document_id}:{generation}:{sequence}");
        Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_generate_id_is_stable() {
        let id = DocumentChunk::generate_id("doc", 1, 5);
        assert_eq!(id, DocumentChunk::generate_id("doc", 1, 5));
        assert_ne!(id, DocumentChunk::generate_id("doc", 2, 5));
        assert_ne!(id, DocumentChunk::generate_id("doc", 1, 6));
    }

    #[test]
    fn test_document_new() {
        let doc = Document::new("a", b"content".to_vec());
        assert_eq!(doc.status, DocumentStatus::Received);
        assert_eq!(doc.checksum.len(), 64);
        assert!(!doc.is_searchable());
    }

    #[test]
    fn test_happy_path_transitions() {
        use DocumentStatus::*;
        let path = [Received, Extracting, Chunking, Embedding, Indexing, Available];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_error_reachable_from_non_terminal_only() {
        use DocumentStatus::*;
        for status in [Received, Extracting, Chunking, Embedding, Indexing] {
            assert!(status.can_transition_to(Error));
        }
        assert!(!Available.can_transition_to(Error));
        assert!(!Deleted.can_transition_to(Error));
    }

    #[test]
    fn test_deleted_and_reprocess_transitions() {
        use DocumentStatus::*;
        assert!(Available.can_transition_to(Deleted));
        assert!(Available.can_transition_to(Extracting));
        assert!(Error.can_transition_to(Extracting));
        assert!(!Deleted.can_transition_to(Extracting));
        assert!(!Chunking.can_transition_to(Deleted));
        assert!(!Received.can_transition_to(Available));
    }

    #[test]
    fn test_status_round_trip_str() {
        for status in [DocumentStatus::Received, DocumentStatus::Deleted] {
            assert_eq!(status.as_str().parse::<DocumentStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<DocumentStatus>().is_err());
    }
}
