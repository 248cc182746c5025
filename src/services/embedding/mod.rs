//! Embedding gateway.
//!
//! Providers implement [`EmbeddingProvider`]; the [`EmbeddingGateway`] wraps
//! one with batching, a per-call timeout, retries for transient failures and
//! validation of what comes back.

mod hashing;
mod http;

pub use hashing::HashingEmbeddingProvider;
pub use http::HttpEmbeddingProvider;
pub(crate) use http::parse_retry_after;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::EmbeddingError;
use crate::models::{EmbeddingConfig, EmbeddingProviderKind};
use crate::utils::{RetryConfig, with_retry};

/// A text-embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model or provider name, for logs and status output.
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Largest batch a single `embed` call accepts.
    fn max_batch_size(&self) -> usize;

    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn health_check(&self) -> Result<String, EmbeddingError> {
        Ok(self.name().to_string())
    }
}

/// Create the provider selected in configuration.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    Ok(match config.provider {
        EmbeddingProviderKind::Http => Arc::new(HttpEmbeddingProvider::new(config)?),
        EmbeddingProviderKind::Hashing => Arc::new(HashingEmbeddingProvider::new(
            config.dimension as usize,
            config.batch_size as usize,
        )),
    })
}

#[derive(Clone)]
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
    batch_size: usize,
    timeout: Duration,
    retry: RetryConfig,
}

impl std::fmt::Debug for EmbeddingGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("provider", &self.provider.name())
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let batch_size = (config.batch_size as usize)
            .min(provider.max_batch_size())
            .max(1);
        Self {
            dimension: config.dimension as usize,
            batch_size,
            timeout: config.timeout(),
            retry: config.retry.to_retry_config(),
            provider,
        }
    }

    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        Ok(Self::new(create_provider(config)?, config))
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn health_check(&self) -> Result<String, EmbeddingError> {
        tokio::time::timeout(self.timeout, self.provider.health_check())
            .await
            .map_err(|_| EmbeddingError::Timeout(self.timeout))?
    }

    /// Embed `texts`, preserving order. Batches are sent one after another;
    /// each is retried on its own.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all_embeddings.extend(self.embed_single_batch(batch).await?);
        }

        debug!(
            provider = self.provider.name(),
            texts = texts.len(),
            latency_ms = started.elapsed().as_millis() as u64,
            "embedded batch"
        );
        Ok(all_embeddings)
    }

    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_single_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Malformed("empty embedding response".to_string()))
    }

    async fn embed_single_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let provider = &self.provider;
        let timeout = self.timeout;
        let dimension = self.dimension;

        let result = with_retry(&self.retry, || async move {
            let vectors = tokio::time::timeout(timeout, provider.embed(batch))
                .await
                .map_err(|_| EmbeddingError::Timeout(timeout))??;
            validate(&vectors, batch.len(), dimension)?;
            Ok::<_, EmbeddingError>(vectors)
        })
        .await;

        let attempts = result.attempts();
        result.into_result().inspect_err(|e| {
            warn!(
                provider = provider.name(),
                attempts,
                error = %e,
                "embedding request failed"
            );
        })
    }
}

fn validate(vectors: &[Vec<f32>], expected: usize, dimension: usize) -> Result<(), EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::Malformed(format!(
            "expected {expected} vectors, got {}",
            vectors.len()
        )));
    }
    for (i, vector) in vectors.iter().enumerate() {
        if vector.len() != dimension {
            return Err(EmbeddingError::Malformed(format!(
                "vector {i} has dimension {}, expected {dimension}",
                vector.len()
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EmbeddingError::Malformed(format!(
                "vector {i} has non-finite components"
            )));
        }
        if vector.iter().all(|x| *x == 0.0) {
            return Err(EmbeddingError::Malformed(format!("vector {i} is all zeros")));
        }
    }
    Ok(())
}
