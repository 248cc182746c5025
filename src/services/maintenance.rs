//! Rebuilding the vector index from the chunk store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::StoreError;
use crate::index::{IndexEntry, VectorIndex, normalize_vector};
use crate::services::store::MetadataStore;

#[derive(Clone)]
pub struct IndexMaintenance {
    index: Arc<VectorIndex>,
    store: Arc<dyn MetadataStore>,
}

impl IndexMaintenance {
    pub fn new(index: Arc<VectorIndex>, store: Arc<dyn MetadataStore>) -> Self {
        Self { index, store }
    }

    /// Replace the index contents with the active chunks of every
    /// searchable document's live generation. Returns the entry count.
    pub async fn rebuild_from_store(&self) -> Result<usize, StoreError> {
        let started = Instant::now();
        let _exclusive = self.index.exclusive_store_access().await;
        let live: HashMap<String, u32> = self
            .store
            .list_documents()
            .await?
            .into_iter()
            .filter(|d| d.is_searchable())
            .filter_map(|d| d.live_generation.map(|g| (d.id, g)))
            .collect();

        let dimension = self.index.dimension();
        let mut skipped = 0usize;
        let entries: Vec<IndexEntry> = self
            .store
            .list_all_active_chunks()
            .await?
            .into_iter()
            .filter(|c| live.get(&c.document_id) == Some(&c.generation))
            .filter(|c| {
                let valid = normalize_vector(&c.embedding, dimension).is_ok();
                if !valid {
                    skipped += 1;
                }
                valid
            })
            .map(|c| IndexEntry {
                chunk_id: c.id,
                sequence: c.sequence,
                vector: c.embedding,
            })
            .collect();

        if skipped > 0 {
            warn!(skipped, "chunks with unusable embeddings left out of the index");
        }

        let count = entries.len();
        self.index
            .rebuild(entries)
            .map_err(|e| StoreError::InvalidRecord(e.to_string()))?;
        info!(
            entries = count,
            documents = live.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index rebuilt from store"
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSettings;
    use crate::models::{Document, DocumentStatus};
    use crate::services::store::InMemoryMetadataStore;
    use crate::services::store::tests::chunk;

    #[tokio::test]
    async fn test_rebuild_uses_live_generation_only() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let mut doc = Document::new("a", b"x".to_vec());
        doc.status = DocumentStatus::Available;
        doc.generation = 2;
        doc.live_generation = Some(2);
        store.save_document(&doc).await.unwrap();

        let mut hidden = Document::new("b", b"y".to_vec());
        hidden.status = DocumentStatus::Deleted;
        hidden.live_generation = Some(1);
        store.save_document(&hidden).await.unwrap();

        let mut broken = chunk("a", 2, 5);
        broken.embedding = vec![0.0; 3];
        store
            .save_chunks(&[chunk("a", 1, 0), chunk("a", 2, 0), broken, chunk("b", 1, 0)])
            .await
            .unwrap();

        let index = Arc::new(VectorIndex::new(3, IndexSettings::default()));
        let maintenance = IndexMaintenance::new(index.clone(), store);
        assert_eq!(maintenance.rebuild_from_store().await.unwrap(), 1);
        assert!(index.contains(&crate::models::DocumentChunk::generate_id("a", 2, 0)));
        assert!(!index.contains(&crate::models::DocumentChunk::generate_id("a", 1, 0)));
    }

    #[tokio::test]
    async fn test_rebuild_waits_for_in_flight_commit() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let index = Arc::new(VectorIndex::new(3, IndexSettings::default()));
        let maintenance = IndexMaintenance::new(index.clone(), store.clone());

        // A commit is halfway through: indexed, not yet in the store.
        let writes = index.store_writes().await;
        let new_chunk = chunk("x", 1, 0);
        index
            .insert(new_chunk.id, new_chunk.sequence, &new_chunk.embedding)
            .unwrap();

        let rebuild = tokio::spawn({
            let maintenance = maintenance.clone();
            async move { maintenance.rebuild_from_store().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!rebuild.is_finished());

        store.save_chunks(std::slice::from_ref(&new_chunk)).await.unwrap();
        let mut doc = Document::new("x", b"x".to_vec());
        doc.status = DocumentStatus::Available;
        doc.generation = 1;
        doc.live_generation = Some(1);
        store.save_document(&doc).await.unwrap();
        drop(writes);

        assert_eq!(rebuild.await.unwrap().unwrap(), 1);
        assert!(index.contains(&new_chunk.id));
    }
}
