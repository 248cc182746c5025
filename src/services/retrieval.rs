//! Query-time retrieval: embed, search, hydrate, deduplicate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{IndexError, QueryError};
use crate::index::VectorIndex;
use crate::models::{Query, QueryParams, RankedPassage, RetrievalConfig, RetrievalResult, ScoredChunk};
use crate::services::embedding::EmbeddingGateway;
use crate::services::maintenance::IndexMaintenance;
use crate::services::store::MetadataStore;

pub struct RetrievalCoordinator {
    embedder: Arc<EmbeddingGateway>,
    index: Arc<VectorIndex>,
    store: Arc<dyn MetadataStore>,
    maintenance: IndexMaintenance,
    config: RetrievalConfig,
}

impl RetrievalCoordinator {
    pub fn new(
        embedder: Arc<EmbeddingGateway>,
        index: Arc<VectorIndex>,
        store: Arc<dyn MetadataStore>,
        config: RetrievalConfig,
    ) -> Self {
        let maintenance = IndexMaintenance::new(index.clone(), store.clone());
        Self {
            embedder,
            index,
            store,
            maintenance,
            config,
        }
    }

    /// Resolve request parameters against configuration and validate them.
    pub fn resolve(&self, text: &str, params: &QueryParams) -> Result<Query, QueryError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(QueryError::InvalidQuery("query text is empty".into()));
        }
        let top_k = params.top_k.unwrap_or(self.config.top_k);
        if top_k == 0 {
            return Err(QueryError::InvalidQuery("top_k must be positive".into()));
        }
        let similarity_threshold = params
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);
        if !(-1.0..=1.0).contains(&similarity_threshold) {
            return Err(QueryError::InvalidQuery(format!(
                "similarity threshold {similarity_threshold} outside [-1, 1]"
            )));
        }
        Ok(Query {
            text: text.to_string(),
            top_k,
            similarity_threshold,
        })
    }

    /// Ranked passages for `text`. No match is an empty result, not an error.
    pub async fn retrieve(
        &self,
        text: &str,
        params: &QueryParams,
    ) -> Result<RetrievalResult, QueryError> {
        let started = Instant::now();
        let query = self.resolve(text, params)?;
        let vector = self.embedder.embed_query(&query.text).await?;

        // Deduplication drops hits, so ask for more than we return.
        let fetch_k = if self.config.dedupe_adjacent {
            query.top_k.saturating_mul(2)
        } else {
            query.top_k
        };
        let hits = self
            .search_with_recovery(&vector, fetch_k, query.similarity_threshold)
            .await?;

        let mut passages = self.hydrate(&hits).await?;
        if self.config.dedupe_adjacent {
            passages = dedupe_adjacent(passages);
        }
        passages.truncate(query.top_k);

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            hits = hits.len(),
            passages = passages.len(),
            top_k = query.top_k,
            threshold = query.similarity_threshold,
            latency_ms = duration_ms,
            "retrieval finished"
        );
        Ok(RetrievalResult {
            query: query.text,
            passages,
            duration_ms,
        })
    }

    async fn search_with_recovery(
        &self,
        vector: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>, QueryError> {
        match self.index.search(vector, top_k, threshold) {
            Err(IndexError::Corruption(reason)) => {
                warn!(%reason, "index corruption detected, rebuilding from store");
                self.maintenance.rebuild_from_store().await?;
                Ok(self.index.search(vector, top_k, threshold)?)
            }
            other => Ok(other?),
        }
    }

    /// Attach chunk content to index hits. Hits whose chunk was deleted or
    /// deactivated since the search are dropped.
    async fn hydrate(&self, hits: &[ScoredChunk]) -> Result<Vec<RankedPassage>, QueryError> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<_> = hits.iter().map(|h| h.chunk_id).collect();
        let mut chunks: HashMap<_, _> = self
            .store
            .load_chunks(&ids)
            .await?
            .into_iter()
            .filter(|c| c.active)
            .map(|c| (c.id, c))
            .collect();

        let passages: Vec<RankedPassage> = hits
            .iter()
            .filter_map(|hit| {
                let chunk = chunks.remove(&hit.chunk_id)?;
                Some(RankedPassage {
                    chunk_id: hit.chunk_id,
                    document_id: chunk.document_id,
                    sequence: chunk.sequence,
                    score: hit.score,
                    text: chunk.text,
                    token_count: chunk.token_count,
                })
            })
            .collect();

        if passages.len() < hits.len() {
            debug!(
                dropped = hits.len() - passages.len(),
                "skipped hits without an active chunk"
            );
        }
        Ok(passages)
    }
}

/// Drop passages adjacent (sequence within 1) to a better-ranked passage of
/// the same document. Input must be in rank order.
pub fn dedupe_adjacent(passages: Vec<RankedPassage>) -> Vec<RankedPassage> {
    let mut kept: Vec<RankedPassage> = Vec::with_capacity(passages.len());
    for passage in passages {
        let overlaps = kept.iter().any(|k| {
            k.document_id == passage.document_id && k.sequence.abs_diff(passage.sequence) <= 1
        });
        if !overlaps {
            kept.push(passage);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSettings;
    use crate::models::{Document, DocumentChunk, DocumentStatus, EmbeddingConfig};
    use crate::services::embedding::testing::fast_config;
    use crate::services::store::InMemoryMetadataStore;
    use chrono::Utc;
    use uuid::Uuid;

    const DIM: u32 = 256;

    struct Fixture {
        coordinator: RetrievalCoordinator,
        index: Arc<VectorIndex>,
        store: Arc<InMemoryMetadataStore>,
        embedder: Arc<EmbeddingGateway>,
    }

    fn embedding_config() -> EmbeddingConfig {
        fast_config(DIM)
    }

    fn fixture(config: RetrievalConfig) -> Fixture {
        let embedder = Arc::new(EmbeddingGateway::from_config(&embedding_config()).unwrap());
        let index = Arc::new(VectorIndex::new(DIM as usize, IndexSettings::default()));
        let store = Arc::new(InMemoryMetadataStore::new());
        let coordinator =
            RetrievalCoordinator::new(embedder.clone(), index.clone(), store.clone(), config);
        Fixture {
            coordinator,
            index,
            store,
            embedder,
        }
    }

    async fn add_document(f: &Fixture, id: &str, texts: &[&str]) {
        let mut doc = Document::new(id, texts.join("\n\n").into_bytes());
        doc.status = DocumentStatus::Available;
        doc.generation = 1;
        doc.live_generation = Some(1);
        f.store.save_document(&doc).await.unwrap();

        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let vectors = f.embedder.embed_batch(&owned).await.unwrap();
        let mut chunks = Vec::new();
        for (seq, (text, vector)) in owned.into_iter().zip(vectors).enumerate() {
            let chunk = DocumentChunk {
                id: DocumentChunk::generate_id(id, 1, seq as u32),
                document_id: id.to_string(),
                generation: 1,
                sequence: seq as u32,
                token_count: text.split_whitespace().count() as u32,
                text,
                start_offset: 0,
                end_offset: 0,
                embedding: vector,
                active: true,
                created_at: Utc::now(),
            };
            f.index
                .insert(chunk.id, chunk.sequence, &chunk.embedding)
                .unwrap();
            chunks.push(chunk);
        }
        f.store.save_chunks(&chunks).await.unwrap();
    }

    fn config(threshold: f32, dedupe: bool) -> RetrievalConfig {
        RetrievalConfig {
            top_k: 5,
            similarity_threshold: threshold,
            dedupe_adjacent: dedupe,
        }
    }

    const CHUNKS: [&str; 3] = [
        "rust ownership rules prevent data races at compile time",
        "the borrow checker enforces aliasing xor mutability for references",
        "cargo builds crates and resolves dependency versions",
    ];

    #[tokio::test]
    async fn test_verbatim_query_ranks_matching_chunk_first() {
        let f = fixture(config(0.3, false));
        add_document(&f, "doc", &CHUNKS).await;

        let result = f
            .coordinator
            .retrieve(CHUNKS[1], &QueryParams::default())
            .await
            .unwrap();
        assert_eq!(result.passages[0].sequence, 1);
        assert!(result.passages[0].score > 0.95);
        assert!(result.passages.iter().all(|p| p.score >= 0.3));
    }

    #[tokio::test]
    async fn test_high_threshold_gives_empty_result() {
        let f = fixture(config(0.3, false));
        add_document(&f, "doc", &CHUNKS).await;

        let params = QueryParams::default().with_threshold(0.99);
        let result = f
            .coordinator
            .retrieve("completely unrelated words about gardening", &params)
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_adjacent_passages_are_deduplicated() {
        let f = fixture(config(-1.0, true));
        add_document(&f, "doc", &CHUNKS).await;

        let result = f
            .coordinator
            .retrieve(CHUNKS[1], &QueryParams::default().with_top_k(3))
            .await
            .unwrap();
        // Chunks 0 and 2 both neighbour chunk 1.
        assert_eq!(result.len(), 1);
        assert_eq!(result.passages[0].sequence, 1);
    }

    #[tokio::test]
    async fn test_deleted_chunks_are_skipped_not_errors() {
        let f = fixture(config(-1.0, false));
        add_document(&f, "doc", &CHUNKS).await;

        // Store-side delete lands before the index tombstone.
        f.store.deactivate_chunks("doc", None).await.unwrap();
        let result = f
            .coordinator
            .retrieve(CHUNKS[0], &QueryParams::default())
            .await
            .unwrap();
        assert!(result.is_empty());

        f.store.purge_document("doc").await.unwrap();
        let result = f
            .coordinator
            .retrieve(CHUNKS[0], &QueryParams::default())
            .await
            .unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_corruption_triggers_rebuild_and_retry() {
        let f = fixture(config(0.3, false));
        add_document(&f, "doc", &CHUNKS).await;
        f.index.corrupt_for_test();
        assert!(f.index.verify().is_err());

        let result = f
            .coordinator
            .retrieve(CHUNKS[2], &QueryParams::default())
            .await
            .unwrap();
        assert_eq!(result.passages[0].sequence, 2);
        assert!(f.index.verify().is_ok());
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected() {
        let f = fixture(config(0.3, false));
        assert!(matches!(
            f.coordinator.retrieve("   ", &QueryParams::default()).await,
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            f.coordinator
                .retrieve("q", &QueryParams::default().with_top_k(0))
                .await,
            Err(QueryError::InvalidQuery(_))
        ));
        assert!(matches!(
            f.coordinator
                .retrieve("q", &QueryParams::default().with_threshold(1.5))
                .await,
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_dedupe_keeps_best_of_neighbours() {
        let p = |doc: &str, seq: u32, score: f32| RankedPassage {
            chunk_id: Uuid::new_v4(),
            document_id: doc.into(),
            sequence: seq,
            score,
            text: String::new(),
            token_count: 0,
        };
        let kept = dedupe_adjacent(vec![
            p("a", 4, 0.9),
            p("a", 5, 0.8),
            p("b", 5, 0.7),
            p("a", 7, 0.6),
            p("a", 3, 0.5),
        ]);
        let seqs: Vec<(String, u32)> = kept.iter().map(|k| (k.document_id.clone(), k.sequence)).collect();
        assert_eq!(
            seqs,
            vec![("a".into(), 4), ("b".into(), 5), ("a".into(), 7)]
        );
    }
}
