//! In-memory [`MetadataStore`] for tests and throwaway sessions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::MetadataStore;
use crate::error::StoreError;
use crate::models::{Document, DocumentChunk, DocumentStatus};

#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    documents: RwLock<HashMap<String, Document>>,
    chunks: RwLock<HashMap<Uuid, DocumentChunk>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect_chunks(&self, filter: impl Fn(&DocumentChunk) -> bool) -> Vec<DocumentChunk> {
        let mut chunks: Vec<DocumentChunk> = self
            .chunks
            .read()
            .values()
            .filter(|c| filter(c))
            .cloned()
            .collect();
        chunks.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.generation.cmp(&b.generation))
                .then(a.sequence.cmp(&b.sequence))
        });
        chunks
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn save_document(&self, document: &Document) -> Result<(), StoreError> {
        self.documents
            .write()
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn load_document(&self, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self.documents.read().get(id).cloned())
    }

    async fn mark_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut documents = self.documents.write();
        let doc = documents
            .get_mut(id)
            .ok_or_else(|| StoreError::DocumentNotFound(id.to_string()))?;
        doc.status = status;
        doc.error = error;
        doc.updated_at = Utc::now();
        Ok(())
    }

    async fn list_documents(&self) -> Result<Vec<Document>, StoreError> {
        let mut docs: Vec<Document> = self
            .documents
            .read()
            .values()
            .map(|d| Document {
                content: Vec::new(),
                ..d.clone()
            })
            .collect();
        docs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn save_chunks(&self, chunks: &[DocumentChunk]) -> Result<(), StoreError> {
        let mut stored = self.chunks.write();
        for chunk in chunks {
            stored.insert(chunk.id, chunk.clone());
        }
        Ok(())
    }

    async fn load_chunks(&self, ids: &[Uuid]) -> Result<Vec<DocumentChunk>, StoreError> {
        let stored = self.chunks.read();
        Ok(ids.iter().filter_map(|id| stored.get(id).cloned()).collect())
    }

    async fn list_active_chunks(
        &self,
        document_id: &str,
    ) -> Result<Vec<DocumentChunk>, StoreError> {
        Ok(self.collect_chunks(|c| c.active && c.document_id == document_id))
    }

    async fn list_all_active_chunks(&self) -> Result<Vec<DocumentChunk>, StoreError> {
        Ok(self.collect_chunks(|c| c.active))
    }

    async fn deactivate_chunks(
        &self,
        document_id: &str,
        generation: Option<u32>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let mut stored = self.chunks.write();
        let mut ids = Vec::new();
        for chunk in stored.values_mut() {
            if chunk.active
                && chunk.document_id == document_id
                && generation.is_none_or(|g| chunk.generation == g)
            {
                chunk.active = false;
                ids.push(chunk.id);
            }
        }
        Ok(ids)
    }

    async fn purge_document(&self, id: &str) -> Result<Vec<Uuid>, StoreError> {
        self.documents.write().remove(id);
        let mut stored = self.chunks.write();
        let ids: Vec<Uuid> = stored
            .values()
            .filter(|c| c.document_id == id)
            .map(|c| c.id)
            .collect();
        for chunk_id in &ids {
            stored.remove(chunk_id);
        }
        Ok(ids)
    }
}
