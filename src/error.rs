//! Error types for docqa.

use std::time::Duration;

use thiserror::Error;

use crate::utils::retry::Retryable;

/// Errors raised while turning raw document bytes into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("document is not valid UTF-8 text: {0}")]
    InvalidEncoding(String),

    #[error("document looks like binary content")]
    Binary,

    #[error("extractor failed: {0}")]
    Extractor(String),
}

/// Errors raised by the chunker.
#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("document text is empty after normalization")]
    EmptyInput,

    #[error("invalid chunking parameters: {0}")]
    InvalidParameters(String),
}

/// Errors related to embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("failed to connect to embedding provider: {0}")]
    Connection(String),

    #[error("embedding provider error (status {status}): {message}")]
    Server { status: u16, message: String },
}

impl Retryable for EmbeddingError {
    fn is_retryable(&self) -> bool {
        match self {
            EmbeddingError::Timeout(_)
            | EmbeddingError::RateLimited { .. }
            | EmbeddingError::Connection(_) => true,
            EmbeddingError::Server { status, .. } => *status >= 500,
            EmbeddingError::Malformed(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbeddingError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Errors raised by the vector index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A structural invariant was violated. The index instance must be
    /// rebuilt from the chunk store.
    #[error("index corruption detected: {0}")]
    Corruption(String),

    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid vector: {0}")]
    InvalidVector(String),
}

/// Errors related to generation operations.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation request timed out after {0:?}")]
    Timeout(Duration),

    #[error("generation provider rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("generation circuit is open, retry in {remaining:?}")]
    CircuitOpen { remaining: Duration },

    #[error("malformed generation response: {0}")]
    Malformed(String),

    #[error("failed to connect to generation provider: {0}")]
    Connection(String),

    #[error("generation provider error (status {status}): {message}")]
    Server { status: u16, message: String },

    #[error("prompt of {tokens} tokens exceeds provider limit of {limit}")]
    PromptTooLarge { tokens: usize, limit: usize },
}

impl Retryable for GenerationError {
    fn is_retryable(&self) -> bool {
        match self {
            GenerationError::Timeout(_)
            | GenerationError::RateLimited { .. }
            | GenerationError::Connection(_) => true,
            GenerationError::Server { status, .. } => *status >= 500,
            GenerationError::CircuitOpen { .. }
            | GenerationError::Malformed(_)
            | GenerationError::PromptTooLarge { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// The context budget cannot hold even a minimal prompt. This is a
/// configuration error, raised at startup or when a request overrides the
/// budget.
#[derive(Debug, Error)]
#[error("context budget of {budget} tokens is below the minimum viable size of {minimum}")]
pub struct ContextOverflowError {
    pub budget: usize,
    pub minimum: usize,
}

/// Errors related to the metadata store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored record is invalid: {0}")]
    InvalidRecord(String),

    #[error("store task failed: {0}")]
    Task(String),
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    #[error("path error: {0}")]
    PathError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    ContextOverflow(#[from] ContextOverflowError),
}

/// Errors raised by ingestion operations. Stage failures are recorded on the
/// document instead; these cover requests the pipeline refuses.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document {0} already exists")]
    AlreadyExists(String),

    #[error("invalid transition for document {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: String,
        to: String,
    },

    #[error("ingestion task failed: {0}")]
    Task(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors raised while answering a query.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    ContextOverflow(#[from] ContextOverflowError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("query cancelled")]
    Cancelled,

    #[error("query exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

impl Retryable for QueryError {
    fn is_retryable(&self) -> bool {
        match self {
            QueryError::Embedding(e) => e.is_retryable(),
            QueryError::Generation(e) => e.is_retryable(),
            QueryError::DeadlineExceeded(_) => true,
            _ => false,
        }
    }
}

/// Application-level errors that wrap domain errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("chunking error: {0}")]
    Chunking(#[from] ChunkingError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_error_classification() {
        assert!(EmbeddingError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(EmbeddingError::RateLimited { retry_after: None }.is_retryable());
        assert!(
            EmbeddingError::Server {
                status: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(
            !EmbeddingError::Server {
                status: 400,
                message: "bad input".into()
            }
            .is_retryable()
        );
        assert!(!EmbeddingError::Malformed("bad".into()).is_retryable());
    }

    #[test]
    fn test_generation_circuit_open_not_retryable() {
        let err = GenerationError::CircuitOpen {
            remaining: Duration::from_secs(5),
        };
        assert!(!err.is_retryable());
        assert!(GenerationError::Timeout(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = EmbeddingError::RateLimited {
            retry_after: Some(Duration::from_millis(250)),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_millis(250)));
        assert_eq!(EmbeddingError::Timeout(Duration::ZERO).retry_after(), None);
    }
}
