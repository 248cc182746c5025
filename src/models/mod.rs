mod config;
mod document;
mod search;

pub use config::{
    API_KEY_ENV, ChunkingConfig, CircuitSettings, Config, ContextConfig,
    DEFAULT_EMBEDDING_DIMENSION, DEFAULT_EMBEDDING_URL, DEFAULT_GENERATION_URL, EmbeddingConfig,
    EmbeddingProviderKind, GenerationConfig, IndexConfig, LogConfig, LogFormat, PipelineConfig,
    QueryConfig, RetrievalConfig, RetrySettings, StorageConfig,
};
pub use document::{Document, DocumentChunk, DocumentStatus};
pub use search::{
    Answer, ContextBlock, ContextPassage, OutputFormat, Query, QueryParams, RankedPassage,
    RetrievalResult, ScoredChunk,
};
