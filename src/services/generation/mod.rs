//! Generation gateway.
//!
//! Builds the prompt from a [`ContextBlock`] and the question, then calls the
//! provider with a timeout, retrying transient failures behind a circuit
//! breaker.

mod openai;

pub use openai::{Message, OpenAiProvider};

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::circuit::{CircuitBreaker, CircuitBreakerStatus};
use crate::error::GenerationError;
use crate::models::{ContextBlock, GenerationConfig};
use crate::utils::{RetryConfig, Retryable, count_tokens, with_retry};

/// Returned without consulting the provider when no passage qualified.
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have sufficient information in the indexed documents to answer this question.";

const PROMPT_HEADER: &str = "Answer the question using only the numbered context passages below. \
If the passages do not contain the answer, reply that there is not sufficient information.";

/// A text-generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// Render the fixed prompt template.
pub fn build_prompt(context: &ContextBlock, question: &str) -> String {
    format!(
        "{PROMPT_HEADER}\n\nContext:\n{}\n\nQuestion: {}\n\nAnswer:",
        context.text,
        question.trim()
    )
}

/// Tokens the template adds around the context for `question`.
pub fn prompt_overhead_tokens(question: &str) -> usize {
    count_tokens(&build_prompt(&ContextBlock::default(), question))
}

pub struct GenerationGateway {
    provider: Arc<dyn GenerationProvider>,
    timeout: Duration,
    retry: RetryConfig,
    max_input_tokens: usize,
    breaker: Mutex<CircuitBreaker>,
}

impl std::fmt::Debug for GenerationGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationGateway")
            .field("provider", &self.provider.name())
            .field("timeout", &self.timeout)
            .field("max_input_tokens", &self.max_input_tokens)
            .finish()
    }
}

impl GenerationGateway {
    pub fn new(provider: Arc<dyn GenerationProvider>, config: &GenerationConfig) -> Self {
        Self {
            provider,
            timeout: config.timeout(),
            retry: config.retry.to_retry_config(),
            max_input_tokens: config.max_input_tokens,
            breaker: Mutex::new(CircuitBreaker::new(
                "generation",
                config.circuit.to_breaker_config(),
            )),
        }
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        Ok(Self::new(Arc::new(OpenAiProvider::new(config)?), config))
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn circuit_status(&self) -> CircuitBreakerStatus {
        self.breaker.lock().status()
    }

    /// Answer `question` from `context`. An empty context yields
    /// [`INSUFFICIENT_INFORMATION`] without a provider call.
    pub async fn generate(
        &self,
        context: &ContextBlock,
        question: &str,
    ) -> Result<String, GenerationError> {
        if context.is_empty() {
            return Ok(INSUFFICIENT_INFORMATION.to_string());
        }

        let prompt = build_prompt(context, question);
        let tokens = count_tokens(&prompt);
        if tokens > self.max_input_tokens {
            return Err(GenerationError::PromptTooLarge {
                tokens,
                limit: self.max_input_tokens,
            });
        }

        let started = Instant::now();
        let prompt = prompt.as_str();
        let result = with_retry(&self.retry, || self.attempt(prompt)).await;
        let attempts = result.attempts();

        match result.into_result() {
            Ok(text) => {
                debug!(
                    provider = self.provider.name(),
                    prompt_tokens = tokens,
                    attempts,
                    latency_ms = started.elapsed().as_millis() as u64,
                    "generated answer"
                );
                Ok(text)
            }
            Err(e) => {
                warn!(provider = self.provider.name(), attempts, error = %e, "generation failed");
                Err(e)
            }
        }
    }

    async fn attempt(&self, prompt: &str) -> Result<String, GenerationError> {
        if let Err(remaining) = self.breaker.lock().allow() {
            return Err(GenerationError::CircuitOpen { remaining });
        }

        let outcome = match tokio::time::timeout(self.timeout, self.provider.generate(prompt)).await
        {
            Ok(Ok(text)) if text.trim().is_empty() => {
                Err(GenerationError::Malformed("empty completion".into()))
            }
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(self.timeout)),
        };

        let mut breaker = self.breaker.lock();
        match &outcome {
            Ok(_) => breaker.record_success(),
            Err(e) if e.is_retryable() => breaker.record_failure(),
            Err(_) => breaker.trip(),
        }
        outcome.map(|text| text.trim().to_string())
    }
}
