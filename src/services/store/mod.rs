//! Persistence for documents and chunks.
//!
//! The store is authoritative for content; the vector index is rebuilt from
//! it. A successful `save_*` call is durable before it returns.

mod memory;
mod sqlite;

pub use memory::InMemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{Document, DocumentChunk, DocumentStatus};

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace a document record, content included.
    async fn save_document(&self, document: &Document) -> Result<(), StoreError>;

    async fn load_document(&self, id: &str) -> Result<Option<Document>, StoreError>;

    /// Set a document's status and failure cause.
    async fn mark_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<(), StoreError>;

    /// All documents, oldest first, without their content.
    async fn list_documents(&self) -> Result<Vec<Document>, StoreError>;

    async fn save_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), StoreError>;

    /// Chunks with the given ids. Unknown ids are skipped.
    async fn load_chunks(&self, ids: &[Uuid]) -> Result<Vec<DocumentChunk>, StoreError>;

    /// Active chunks of one document, in sequence order.
    async fn list_active_chunks(&self, document_id: &str)
    -> Result<Vec<DocumentChunk>, StoreError>;

    async fn list_all_active_chunks(&self) -> Result<Vec<DocumentChunk>, StoreError>;

    /// Mark a document's chunks inactive: one generation, or all of them
    /// when `generation` is `None`. Returns the ids that were deactivated.
    async fn deactivate_chunks(
        &self,
        document_id: &str,
        generation: Option<u32>,
    ) -> Result<Vec<Uuid>, StoreError>;

    /// Physically remove a document and its chunks. Returns the removed
    /// chunk ids.
    async fn purge_document(&self, id: &str) -> Result<Vec<Uuid>, StoreError>;
}

pub(crate) fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>, StoreError> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidRecord(format!(
            "embedding blob of {} bytes is not a whole number of f32 values",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;

    pub fn chunk(document_id: &str, generation: u32, sequence: u32) -> DocumentChunk {
        DocumentChunk {
            id: DocumentChunk::generate_id(document_id, generation, sequence),
            document_id: document_id.to_string(),
            generation,
            sequence,
            text: format!("chunk {sequence} of {document_id}"),
            token_count: 4,
            start_offset: u64::from(sequence) * 10,
            end_offset: u64::from(sequence) * 10 + 9,
            embedding: vec![0.5, -1.25, 3.0],
            active: true,
            created_at: Utc::now(),
        }
    }

    /// Behaviour every store implementation must share.
    pub async fn exercise_store(store: Arc<dyn MetadataStore>) {
        let mut doc = Document::new("doc-1", b"hello world".to_vec());
        store.save_document(&doc).await.unwrap();

        let loaded = store.load_document("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.content, b"hello world");
        assert_eq!(loaded.checksum, doc.checksum);
        assert_eq!(loaded.status, DocumentStatus::Received);
        assert!(store.load_document("missing").await.unwrap().is_none());

        store
            .mark_status("doc-1", DocumentStatus::Error, Some("boom".into()))
            .await
            .unwrap();
        let loaded = store.load_document("doc-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Error);
        assert_eq!(loaded.error.as_deref(), Some("boom"));
        assert!(matches!(
            store
                .mark_status("missing", DocumentStatus::Error, None)
                .await,
            Err(StoreError::DocumentNotFound(_))
        ));

        doc.generation = 1;
        doc.live_generation = Some(1);
        doc.status = DocumentStatus::Available;
        store.save_document(&doc).await.unwrap();

        let gen1 = vec![chunk("doc-1", 1, 1), chunk("doc-1", 1, 0)];
        let gen2 = vec![chunk("doc-1", 2, 0)];
        store.save_chunks(&gen1).await.unwrap();
        store.save_chunks(&gen2).await.unwrap();
        store.save_chunks(&[chunk("doc-2", 1, 0)]).await.unwrap();

        let active = store.list_active_chunks("doc-1").await.unwrap();
        assert_eq!(active.len(), 3);
        assert_eq!(active[0].embedding, vec![0.5, -1.25, 3.0]);

        let deactivated = store.deactivate_chunks("doc-1", Some(1)).await.unwrap();
        assert_eq!(deactivated.len(), 2);
        let active = store.list_active_chunks("doc-1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].generation, 2);
        assert_eq!(store.list_all_active_chunks().await.unwrap().len(), 2);

        let ids = vec![gen1[0].id, Uuid::nil()];
        let loaded = store.load_chunks(&ids).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[0].active);

        let listed = store.list_documents().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].content.is_empty());
        assert_eq!(listed[0].live_generation, Some(1));

        let removed = store.purge_document("doc-1").await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(store.load_document("doc-1").await.unwrap().is_none());
        assert!(store.list_active_chunks("doc-1").await.unwrap().is_empty());
        assert_eq!(store.list_all_active_chunks().await.unwrap().len(), 1);
    }

    #[test]
    fn test_blob_round_trip() {
        let v = vec![1.0f32, -0.5, f32::MIN_POSITIVE];
        let blob = vec_to_blob(&v);
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_vec(&blob).unwrap(), v);
        assert!(blob_to_vec(&blob[..5]).is_err());
    }
}
