//! Wiring of the ingestion and query paths around one shared index.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, ConfigError, QueryError};
use crate::index::{IndexSettings, IndexStats, VectorIndex};
use crate::models::{Answer, Config, QueryParams, RetrievalResult};
use crate::services::chunker::TextChunker;
use crate::services::circuit::CircuitBreakerStatus;
use crate::services::context::ContextAssembler;
use crate::services::embedding::{EmbeddingGateway, EmbeddingProvider, create_provider};
use crate::services::extract::{Extractor, PlainTextExtractor};
use crate::services::feedback::{FeedbackRecord, FeedbackSink, JsonlFeedbackSink, NoopFeedbackSink};
use crate::services::generation::{
    GenerationGateway, GenerationProvider, OpenAiProvider, prompt_overhead_tokens,
};
use crate::services::maintenance::IndexMaintenance;
use crate::services::pipeline::IngestionPipeline;
use crate::services::retrieval::RetrievalCoordinator;
use crate::services::store::{MetadataStore, SqliteMetadataStore};
use crate::utils::CancelToken;

/// Retrieve, assemble and generate for one question.
pub struct AnswerEngine {
    retrieval: Arc<RetrievalCoordinator>,
    assembler: ContextAssembler,
    generator: Arc<GenerationGateway>,
    feedback: Arc<dyn FeedbackSink>,
    timeout: Duration,
}

impl AnswerEngine {
    pub fn new(
        retrieval: Arc<RetrievalCoordinator>,
        assembler: ContextAssembler,
        generator: Arc<GenerationGateway>,
        feedback: Arc<dyn FeedbackSink>,
        timeout: Duration,
    ) -> Self {
        Self {
            retrieval,
            assembler,
            generator,
            feedback,
            timeout,
        }
    }

    /// Answer `question` within the query deadline. `cancel` is checked
    /// between stages.
    pub async fn answer(
        &self,
        question: &str,
        params: &QueryParams,
        cancel: &CancelToken,
    ) -> Result<Answer, QueryError> {
        let started = Instant::now();
        let answer = tokio::time::timeout(self.timeout, self.run(question, params, cancel, started))
            .await
            .map_err(|_| QueryError::DeadlineExceeded(self.timeout))??;

        info!(
            passages = answer.context.passages.len(),
            context_tokens = answer.context.total_tokens,
            insufficient = answer.insufficient_information,
            latency_ms = answer.duration_ms,
            "answered query"
        );

        if let Err(e) = self.feedback.emit(FeedbackRecord::from_answer(&answer)).await {
            warn!(error = %e, "failed to emit feedback record");
        }
        Ok(answer)
    }

    async fn run(
        &self,
        question: &str,
        params: &QueryParams,
        cancel: &CancelToken,
        started: Instant,
    ) -> Result<Answer, QueryError> {
        let budget = params
            .token_budget
            .unwrap_or_else(|| self.assembler.default_budget());
        self.assembler.check_budget(budget, question)?;
        checkpoint(cancel)?;

        let retrieved = self.retrieval.retrieve(question, params).await?;
        checkpoint(cancel)?;

        let context = self
            .assembler
            .assemble(&retrieved.passages, budget, question)?;
        debug!(
            overhead = prompt_overhead_tokens(question),
            context_tokens = context.total_tokens,
            "prompt sized"
        );
        checkpoint(cancel)?;

        let insufficient_information = context.is_empty();
        let text = self.generator.generate(&context, question).await?;

        Ok(Answer {
            question: retrieved.query,
            text,
            insufficient_information,
            context,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn checkpoint(cancel: &CancelToken) -> Result<(), QueryError> {
    if cancel.is_cancelled() {
        return Err(QueryError::Cancelled);
    }
    Ok(())
}

/// Snapshot for `docqa status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub documents: BTreeMap<String, usize>,
    pub index: IndexStats,
    pub embedding_provider: String,
    pub generation_provider: String,
    pub generation_circuit: CircuitBreakerStatus,
}

/// Every component the CLI needs, built from one [`Config`].
pub struct Engine {
    store: Arc<dyn MetadataStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<EmbeddingGateway>,
    generator: Arc<GenerationGateway>,
    retrieval: Arc<RetrievalCoordinator>,
    pipeline: IngestionPipeline,
    answers: AnswerEngine,
    maintenance: IndexMaintenance,
}

impl Engine {
    /// Open the SQLite store and the configured providers, then rebuild the
    /// index from the stored chunks.
    pub async fn open(config: &Config) -> Result<Self, AppError> {
        let db_path = config.storage.database_path().ok_or_else(|| {
            ConfigError::PathError("could not determine data directory".into())
        })?;
        let store = Arc::new(SqliteMetadataStore::open(&db_path)?);
        let embedding = create_provider(&config.embedding)?;
        let generation = Arc::new(OpenAiProvider::new(&config.generation)?);
        let feedback: Arc<dyn FeedbackSink> = match config.storage.feedback_path() {
            Some(path) => Arc::new(JsonlFeedbackSink::new(path)),
            None => Arc::new(NoopFeedbackSink),
        };

        let engine = Self::with_components(
            config,
            store,
            embedding,
            generation,
            Arc::new(PlainTextExtractor),
            feedback,
        )?;
        engine.pipeline.recover_interrupted().await?;
        engine.rebuild_index().await?;
        Ok(engine)
    }

    pub fn with_components(
        config: &Config,
        store: Arc<dyn MetadataStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        generation: Arc<dyn GenerationProvider>,
        extractor: Arc<dyn Extractor>,
        feedback: Arc<dyn FeedbackSink>,
    ) -> Result<Self, AppError> {
        if embedding.dimension() != config.embedding.dimension as usize {
            return Err(ConfigError::ValidationError(format!(
                "embedding provider {} produces {}-dimensional vectors but embedding.dimension is {}",
                embedding.name(),
                embedding.dimension(),
                config.embedding.dimension
            ))
            .into());
        }
        let embedder = Arc::new(EmbeddingGateway::new(embedding, &config.embedding));

        let index = Arc::new(VectorIndex::new(
            embedder.dimension(),
            IndexSettings::from(&config.index),
        ));
        let generator = Arc::new(GenerationGateway::new(generation, &config.generation));
        let assembler = ContextAssembler::new(&config.context).map_err(ConfigError::from)?;
        let chunker = TextChunker::new(&config.chunking)?;

        let retrieval = Arc::new(RetrievalCoordinator::new(
            embedder.clone(),
            index.clone(),
            store.clone(),
            config.retrieval.clone(),
        ));
        let pipeline = IngestionPipeline::new(
            extractor,
            chunker,
            embedder.clone(),
            index.clone(),
            store.clone(),
            &config.pipeline,
        );
        let answers = AnswerEngine::new(
            retrieval.clone(),
            assembler,
            generator.clone(),
            feedback,
            config.query.timeout(),
        );
        let maintenance = IndexMaintenance::new(index.clone(), store.clone());

        Ok(Self {
            store,
            index,
            embedder,
            generator,
            retrieval,
            pipeline,
            answers,
            maintenance,
        })
    }

    pub async fn rebuild_index(&self) -> Result<usize, AppError> {
        Ok(self.maintenance.rebuild_from_store().await?)
    }

    pub fn pipeline(&self) -> &IngestionPipeline {
        &self.pipeline
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn embedder(&self) -> &EmbeddingGateway {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub async fn answer(
        &self,
        question: &str,
        params: &QueryParams,
        cancel: &CancelToken,
    ) -> Result<Answer, QueryError> {
        self.answers.answer(question, params, cancel).await
    }

    /// Retrieval only, without assembling or generating.
    pub async fn search(
        &self,
        query: &str,
        params: &QueryParams,
    ) -> Result<RetrievalResult, QueryError> {
        self.retrieval.retrieve(query, params).await
    }

    pub async fn status(&self) -> Result<EngineStatus, AppError> {
        let mut documents = BTreeMap::new();
        for doc in self.store.list_documents().await? {
            *documents.entry(doc.status.to_string()).or_insert(0) += 1;
        }
        Ok(EngineStatus {
            documents,
            index: self.index.stats(),
            embedding_provider: self.embedder.provider_name().to_string(),
            generation_provider: self.generator.provider_name().to_string(),
            generation_circuit: self.generator.circuit_status(),
        })
    }
}
