pub mod chunker;
pub mod circuit;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod extract;
pub mod feedback;
pub mod generation;
pub mod maintenance;
pub mod pipeline;
pub mod retrieval;
pub mod store;

pub use chunker::{ChunkSpan, TextChunker};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStatus};
pub use context::ContextAssembler;
pub use embedding::{EmbeddingGateway, EmbeddingProvider};
pub use engine::{AnswerEngine, Engine, EngineStatus};
pub use extract::{Extractor, PlainTextExtractor};
pub use feedback::{FeedbackRecord, FeedbackSink, JsonlFeedbackSink};
pub use generation::{GenerationGateway, GenerationProvider};
pub use maintenance::IndexMaintenance;
pub use pipeline::{IngestHandle, IngestionPipeline};
pub use retrieval::RetrievalCoordinator;
pub use store::{InMemoryMetadataStore, MetadataStore, SqliteMetadataStore};
