//! Document ingestion: extraction, chunking, embedding, indexing.
//!
//! Each document runs through its stages sequentially on its own task;
//! documents run in parallel up to `max_concurrent_documents`. Every status
//! change is persisted before the next stage starts. A failed stage leaves
//! the document in `Error` with the cause recorded, and whatever generation
//! was live before stays searchable.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{PipelineError, StoreError};
use crate::index::{IndexEntry, VectorIndex};
use crate::models::{Document, DocumentChunk, DocumentStatus, PipelineConfig};
use crate::services::chunker::TextChunker;
use crate::services::embedding::EmbeddingGateway;
use crate::services::extract::Extractor;
use crate::services::store::MetadataStore;

/// Ingestion should finish within this; slower runs are logged.
const INGEST_TARGET: Duration = Duration::from_secs(10);

/// Tracks a submitted document until its pipeline run ends.
#[derive(Debug)]
pub struct IngestHandle {
    document_id: String,
    task: JoinHandle<DocumentStatus>,
}

impl IngestHandle {
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Wait for the run to finish and return the terminal status.
    pub async fn wait(self) -> Result<DocumentStatus, PipelineError> {
        self.task
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))
    }
}

struct Inner {
    extractor: Arc<dyn Extractor>,
    chunker: TextChunker,
    embedder: Arc<EmbeddingGateway>,
    index: Arc<VectorIndex>,
    store: Arc<dyn MetadataStore>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases a document's in-flight claim when dropped.
struct Claim {
    inner: Arc<Inner>,
    document_id: String,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.inner.in_flight.lock().remove(&self.document_id);
    }
}

/// A stage failure: the cause recorded on the document.
struct StageFailure(String);

impl<E: std::fmt::Display> From<E> for StageFailure {
    fn from(e: E) -> Self {
        StageFailure(e.to_string())
    }
}

#[derive(Clone)]
pub struct IngestionPipeline {
    inner: Arc<Inner>,
}

impl IngestionPipeline {
    pub fn new(
        extractor: Arc<dyn Extractor>,
        chunker: TextChunker,
        embedder: Arc<EmbeddingGateway>,
        index: Arc<VectorIndex>,
        store: Arc<dyn MetadataStore>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                extractor,
                chunker,
                embedder,
                index,
                store,
                permits: Arc::new(Semaphore::new(config.max_concurrent_documents.max(1))),
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    fn claim(&self, document_id: &str) -> Option<Claim> {
        let mut in_flight = self.inner.in_flight.lock();
        if !in_flight.insert(document_id.to_string()) {
            return None;
        }
        Some(Claim {
            inner: Arc::clone(&self.inner),
            document_id: document_id.to_string(),
        })
    }

    fn busy(&self, document_id: &str, status: DocumentStatus, to: DocumentStatus) -> PipelineError {
        PipelineError::InvalidTransition {
            id: document_id.to_string(),
            from: status.to_string(),
            to: to.to_string(),
        }
    }

    async fn load(&self, document_id: &str) -> Result<Document, PipelineError> {
        self.inner
            .store
            .load_document(document_id)
            .await?
            .ok_or_else(|| StoreError::DocumentNotFound(document_id.to_string()).into())
    }

    /// Register a new document and start processing it. Returns as soon as
    /// the document is recorded as `Received`.
    pub async fn submit(
        &self,
        document_id: &str,
        content: Vec<u8>,
    ) -> Result<IngestHandle, PipelineError> {
        let claim = self
            .claim(document_id)
            .ok_or_else(|| PipelineError::AlreadyExists(document_id.to_string()))?;

        let mut document = Document::new(document_id, content);
        if let Some(existing) = self.inner.store.load_document(document_id).await? {
            if existing.status != DocumentStatus::Deleted {
                return Err(PipelineError::AlreadyExists(document_id.to_string()));
            }
            // Keep generations increasing so chunk ids never repeat.
            document.generation = existing.generation;
        }
        self.inner.store.save_document(&document).await?;
        info!(document_id, bytes = document.content.len(), checksum = %document.checksum, "document received");

        Ok(self.spawn(document, claim))
    }

    /// Run an `Available` or `Error` document through the pipeline again.
    /// The current generation stays searchable until the new one is indexed.
    pub async fn reprocess(&self, document_id: &str) -> Result<IngestHandle, PipelineError> {
        let claim = self.claim(document_id);
        let document = self.load(document_id).await?;
        let Some(claim) = claim else {
            return Err(self.busy(document_id, document.status, DocumentStatus::Extracting));
        };
        if !document.status.can_transition_to(DocumentStatus::Extracting) {
            return Err(self.busy(document_id, document.status, DocumentStatus::Extracting));
        }
        info!(document_id, generation = document.generation, "reprocessing document");
        Ok(self.spawn(document, claim))
    }

    /// Store new content for an `Available` or `Error` document and run it
    /// through the pipeline. The live generation keeps answering queries
    /// until the new content is indexed, and stays live if processing fails.
    pub async fn replace(
        &self,
        document_id: &str,
        content: Vec<u8>,
    ) -> Result<IngestHandle, PipelineError> {
        let claim = self.claim(document_id);
        let mut document = self.load(document_id).await?;
        let Some(claim) = claim else {
            return Err(self.busy(document_id, document.status, DocumentStatus::Extracting));
        };
        if !document.status.can_transition_to(DocumentStatus::Extracting) {
            return Err(self.busy(document_id, document.status, DocumentStatus::Extracting));
        }

        document.checksum = Document::checksum(&content);
        document.content = content;
        document.updated_at = Utc::now();
        info!(
            document_id,
            bytes = document.content.len(),
            checksum = %document.checksum,
            live_generation = ?document.live_generation,
            "replacing document content"
        );
        Ok(self.spawn(document, claim))
    }

    /// Soft delete: the document and its chunks stay in the store, inactive,
    /// and its index entries are tombstoned.
    pub async fn delete(&self, document_id: &str) -> Result<(), PipelineError> {
        let claim = self.claim(document_id);
        let mut document = self.load(document_id).await?;
        if claim.is_none() || !document.status.can_transition_to(DocumentStatus::Deleted) {
            return Err(self.busy(document_id, document.status, DocumentStatus::Deleted));
        }

        let _writes = self.inner.index.store_writes().await;
        let chunk_ids = self.inner.store.deactivate_chunks(document_id, None).await?;
        let removed = self.inner.index.delete_many(&chunk_ids);
        document.status = DocumentStatus::Deleted;
        document.live_generation = None;
        document.updated_at = Utc::now();
        self.inner.store.save_document(&document).await?;
        self.inner.index.schedule_compaction();

        info!(document_id, chunks = removed, "document deleted");
        Ok(())
    }

    /// Permanently remove a document in a terminal state and its chunks.
    pub async fn purge(&self, document_id: &str) -> Result<usize, PipelineError> {
        let claim = self.claim(document_id);
        let document = self.load(document_id).await?;
        if claim.is_none() || !document.status.is_terminal() {
            return Err(PipelineError::InvalidTransition {
                id: document_id.to_string(),
                from: document.status.to_string(),
                to: "purged".to_string(),
            });
        }

        let _writes = self.inner.index.store_writes().await;
        let chunk_ids = self.inner.store.purge_document(document_id).await?;
        self.inner.index.delete_many(&chunk_ids);
        self.inner.index.schedule_compaction();

        info!(document_id, chunks = chunk_ids.len(), "document purged");
        Ok(chunk_ids.len())
    }

    /// Move documents left mid-pipeline by an earlier process into `Error`
    /// so they can be reprocessed. Returns how many were recovered.
    pub async fn recover_interrupted(&self) -> Result<usize, PipelineError> {
        let mut recovered = 0;
        for document in self.inner.store.list_documents().await? {
            if document.status.is_terminal() || self.inner.in_flight.lock().contains(&document.id) {
                continue;
            }
            self.inner
                .store
                .mark_status(
                    &document.id,
                    DocumentStatus::Error,
                    Some(format!("interrupted while {}", document.status)),
                )
                .await?;
            warn!(document_id = %document.id, stage = %document.status, "recovered interrupted document");
            recovered += 1;
        }
        Ok(recovered)
    }

    pub async fn document(&self, document_id: &str) -> Result<Document, PipelineError> {
        self.load(document_id).await
    }

    pub async fn documents(&self) -> Result<Vec<Document>, PipelineError> {
        Ok(self.inner.store.list_documents().await?)
    }

    fn spawn(&self, document: Document, claim: Claim) -> IngestHandle {
        let document_id = document.id.clone();
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            let _claim = claim;
            let permit = match Arc::clone(&inner.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!(document_id = %document.id, error = %e, "ingestion permits closed");
                    return document.status;
                }
            };
            let status = run(&inner, document).await;
            drop(permit);
            status
        });
        IngestHandle { document_id, task }
    }
}

/// Drive one document to a terminal status.
async fn run(inner: &Inner, mut document: Document) -> DocumentStatus {
    let started = Instant::now();
    let previous = document.live_generation;
    document.generation += 1;
    document.error = None;

    let status = match process(inner, &mut document).await {
        Ok(()) => DocumentStatus::Available,
        Err(StageFailure(cause)) => {
            warn!(
                document_id = %document.id,
                stage = %document.status,
                cause = %cause,
                "ingestion failed"
            );
            document.status = DocumentStatus::Error;
            document.error = Some(cause);
            document.live_generation = previous;
            document.updated_at = Utc::now();
            if let Err(e) = inner.store.save_document(&document).await {
                error!(document_id = %document.id, error = %e, "failed to record ingestion failure");
            }
            DocumentStatus::Error
        }
    };

    let elapsed = started.elapsed();
    if elapsed > INGEST_TARGET {
        warn!(document_id = %document.id, elapsed_ms = elapsed.as_millis() as u64, "ingestion exceeded target latency");
    }
    if status == DocumentStatus::Available {
        info!(
            document_id = %document.id,
            generation = document.generation,
            chunk_count = document.chunk_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "document available"
        );
    }
    status
}

async fn advance(
    inner: &Inner,
    document: &mut Document,
    next: DocumentStatus,
) -> Result<(), StageFailure> {
    if !document.status.can_transition_to(next) {
        return Err(StageFailure(format!(
            "invalid transition {} -> {next}",
            document.status
        )));
    }
    debug!(document_id = %document.id, from = %document.status, to = %next, "stage transition");
    document.status = next;
    document.updated_at = Utc::now();
    // Full save: the generation counter changes on entering extraction.
    inner.store.save_document(document).await?;
    Ok(())
}

async fn process(inner: &Inner, document: &mut Document) -> Result<(), StageFailure> {
    advance(inner, document, DocumentStatus::Extracting).await?;
    let text = inner.extractor.extract(&document.content)?;

    advance(inner, document, DocumentStatus::Chunking).await?;
    let spans = inner.chunker.chunk(&text)?;

    advance(inner, document, DocumentStatus::Embedding).await?;
    let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
    let vectors = inner.embedder.embed_batch(&texts).await?;

    advance(inner, document, DocumentStatus::Indexing).await?;
    let now = Utc::now();
    let generation = document.generation;
    let chunks: Vec<DocumentChunk> = spans
        .into_iter()
        .zip(vectors)
        .map(|(span, embedding)| DocumentChunk {
            id: DocumentChunk::generate_id(&document.id, generation, span.sequence),
            document_id: document.id.clone(),
            generation,
            sequence: span.sequence,
            text: span.text,
            token_count: span.token_count as u32,
            start_offset: span.start as u64,
            end_offset: span.end as u64,
            embedding,
            active: true,
            created_at: now,
        })
        .collect();
    let new_ids: Vec<Uuid> = chunks.iter().map(|c| c.id).collect();

    let entries: Vec<IndexEntry> = chunks
        .iter()
        .map(|c| IndexEntry {
            chunk_id: c.id,
            sequence: c.sequence,
            vector: c.embedding.clone(),
        })
        .collect();
    let _writes = inner.index.store_writes().await;
    inner.index.insert_batch(&entries)?;

    if let Err(e) = commit(inner, document, &chunks).await {
        inner.index.delete_many(&new_ids);
        if let Err(cleanup) = inner
            .store
            .deactivate_chunks(&document.id, Some(generation))
            .await
        {
            warn!(document_id = %document.id, error = %cleanup, "failed to deactivate rolled back chunks");
        }
        return Err(e);
    }
    inner.index.schedule_compaction();
    Ok(())
}

/// Persist the new generation and retire the previous one.
async fn commit(
    inner: &Inner,
    document: &mut Document,
    chunks: &[DocumentChunk],
) -> Result<(), StageFailure> {
    inner.store.save_chunks(chunks).await?;

    let previous = document.live_generation;
    document.status = DocumentStatus::Available;
    document.live_generation = Some(document.generation);
    document.chunk_count = chunks.len() as u32;
    document.updated_at = Utc::now();
    inner.store.save_document(document).await?;

    if let Some(previous) = previous {
        let retired = inner
            .store
            .deactivate_chunks(&document.id, Some(previous))
            .await?;
        inner.index.delete_many(&retired);
        debug!(document_id = %document.id, generation = previous, chunks = retired.len(), "retired previous generation");
    }
    Ok(())
}
