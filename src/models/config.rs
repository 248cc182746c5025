use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ContextOverflowError};
use crate::services::circuit::CircuitBreakerConfig;
use crate::utils::RetryConfig;

pub const DEFAULT_EMBEDDING_URL: &str = "http://localhost:11411";
pub const DEFAULT_GENERATION_URL: &str = "http://localhost:1234/v1";
pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 384;
pub const API_KEY_ENV: &str = "DOCQA_GENERATION_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub retrieval: RetrievalConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub query: QueryConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("docqa").join("config.toml"))
    }

    pub fn data_dir() -> Option<PathBuf> {
        dirs::data_local_dir().map(|p| p.join("docqa"))
    }

    /// Load the config file if present, apply environment overrides and
    /// validate the result.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::config_path() {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(&path)?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path()
            .ok_or_else(|| ConfigError::PathError("could not determine config directory".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.is_empty()
        {
            self.generation.api_key = Some(key);
        }
    }

    /// Reject settings that could only fail later at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.embedding.dimension == 0 {
            return invalid("embedding.dimension must be positive".into());
        }
        if self.embedding.batch_size == 0 {
            return invalid("embedding.batch_size must be positive".into());
        }
        if self.chunking.chunk_tokens == 0 {
            return invalid("chunking.chunk_tokens must be positive".into());
        }
        if self.chunking.overlap_tokens >= self.chunking.chunk_tokens {
            return invalid(format!(
                "chunking.overlap_tokens ({}) must be smaller than chunk_tokens ({})",
                self.chunking.overlap_tokens, self.chunking.chunk_tokens
            ));
        }
        if self.chunking.min_chunk_tokens * 5 > self.chunking.chunk_tokens * 4 {
            return invalid(format!(
                "chunking.min_chunk_tokens ({}) must be at most 4/5 of chunk_tokens ({})",
                self.chunking.min_chunk_tokens, self.chunking.chunk_tokens
            ));
        }
        if !(-1.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            return invalid("retrieval.similarity_threshold must be within [-1, 1]".into());
        }
        if self.retrieval.top_k == 0 {
            return invalid("retrieval.top_k must be at least 1".into());
        }
        if !(0.0..1.0).contains(&self.index.tombstone_ratio) || self.index.tombstone_ratio == 0.0 {
            return invalid("index.tombstone_ratio must be within (0, 1)".into());
        }
        if self.context.token_budget < self.context.min_budget_tokens {
            return Err(ContextOverflowError {
                budget: self.context.token_budget,
                minimum: self.context.min_budget_tokens,
            }
            .into());
        }
        if self.context.token_budget + self.context.prompt_reserve_tokens
            > self.generation.max_input_tokens
        {
            return invalid(format!(
                "context.token_budget ({}) plus prompt_reserve_tokens ({}) exceeds generation.max_input_tokens ({})",
                self.context.token_budget,
                self.context.prompt_reserve_tokens,
                self.generation.max_input_tokens
            ));
        }
        Ok(())
    }
}

/// Retry settings as they appear in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Remote embedding server
    #[default]
    Http,
    /// Deterministic local feature hashing
    Hashing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProviderKind,

    #[serde(default = "default_embedding_url")]
    pub url: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_embedding_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_embedding_url() -> String {
    DEFAULT_EMBEDDING_URL.to_string()
}

fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_dimension() -> u32 {
    DEFAULT_EMBEDDING_DIMENSION
}

fn default_batch_size() -> u32 {
    32
}

fn default_embedding_timeout_ms() -> u64 {
    2_000
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            batch_size: default_batch_size(),
            timeout_ms: default_embedding_timeout_ms(),
            retry: RetrySettings::default(),
        }
    }
}

impl EmbeddingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,

    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_success_threshold() -> u32 {
    1
}

fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl CircuitSettings {
    pub fn to_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig::new(
            self.failure_threshold,
            self.success_threshold,
            Duration::from_millis(self.cooldown_ms),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_url")]
    pub url: String,

    #[serde(default = "default_generation_model")]
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub api_key: Option<String>,

    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_generation_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub circuit: CircuitSettings,
}

fn default_generation_url() -> String {
    DEFAULT_GENERATION_URL.to_string()
}

fn default_generation_model() -> String {
    "qwen/qwen3-8b".to_string()
}

fn default_max_input_tokens() -> usize {
    4_096
}

fn default_max_output_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.2
}

fn default_generation_timeout_ms() -> u64 {
    2_500
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: default_generation_url(),
            model: default_generation_model(),
            api_key: None,
            max_input_tokens: default_max_input_tokens(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            timeout_ms: default_generation_timeout_ms(),
            retry: RetrySettings {
                max_attempts: 2,
                ..RetrySettings::default()
            },
            circuit: CircuitSettings::default(),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_tokens")]
    pub chunk_tokens: usize,

    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,

    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
}

fn default_chunk_tokens() -> usize {
    200
}

fn default_overlap_tokens() -> usize {
    40
}

fn default_min_chunk_tokens() -> usize {
    20
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_tokens: default_chunk_tokens(),
            overlap_tokens: default_overlap_tokens(),
            min_chunk_tokens: default_min_chunk_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Fraction of tombstoned entries that triggers compaction.
    #[serde(default = "default_tombstone_ratio")]
    pub tombstone_ratio: f64,

    /// Entry count at which compaction also clusters the index into partitions.
    #[serde(default = "default_partition_min_entries")]
    pub partition_min_entries: usize,

    /// Partitions scanned per search. Zero scans every partition.
    #[serde(default)]
    pub nprobe: usize,
}

fn default_tombstone_ratio() -> f64 {
    0.1
}

fn default_partition_min_entries() -> usize {
    4_096
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            tombstone_ratio: default_tombstone_ratio(),
            partition_min_entries: default_partition_min_entries(),
            nprobe: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_true")]
    pub dedupe_adjacent: bool,
}

fn default_top_k() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_true() -> bool {
    true
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            similarity_threshold: default_similarity_threshold(),
            dedupe_adjacent: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default = "default_min_budget_tokens")]
    pub min_budget_tokens: usize,

    /// Tokens kept free in the generation input for the template and question.
    #[serde(default = "default_prompt_reserve_tokens")]
    pub prompt_reserve_tokens: usize,
}

fn default_token_budget() -> usize {
    2_048
}

fn default_min_budget_tokens() -> usize {
    32
}

fn default_prompt_reserve_tokens() -> usize {
    512
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            min_budget_tokens: default_min_budget_tokens(),
            prompt_reserve_tokens: default_prompt_reserve_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,
}

fn default_max_concurrent_documents() -> usize {
    4
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: default_max_concurrent_documents(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_query_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_query_timeout_ms() -> u64 {
    3_000
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_query_timeout_ms(),
        }
    }
}

impl QueryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite database file. Defaults to the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub database_path: Option<PathBuf>,

    /// JSON lines file receiving one feedback record per answered query.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub feedback_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(|| Config::data_dir().map(|d| d.join("docqa.db")))
    }

    pub fn feedback_path(&self) -> Option<PathBuf> {
        self.feedback_path
            .clone()
            .or_else(|| Config::data_dir().map(|d| d.join("feedback.jsonl")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.url, DEFAULT_EMBEDDING_URL);
        assert_eq!(config.query.timeout_ms, 3_000);
        assert!((config.index.tombstone_ratio - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_config_path() {
        let path = Config::config_path();
        assert!(path.is_some());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [chunking]
            chunk_tokens = 100

            [retrieval]
            similarity_threshold = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking.chunk_tokens, 100);
        assert_eq!(config.chunking.overlap_tokens, 40);
        assert_eq!(config.retrieval.top_k, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = Config::default();
        config.chunking.overlap_tokens = config.chunking.chunk_tokens;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_budget_below_minimum_is_context_overflow() {
        let mut config = Config::default();
        config.context.token_budget = 8;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ContextOverflow(_))
        ));
    }

    #[test]
    fn test_budget_must_fit_generation_input() {
        let mut config = Config::default();
        config.context.token_budget = config.generation.max_input_tokens;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_kind_parses() {
        let config: EmbeddingConfig = toml::from_str("provider = \"hashing\"").unwrap();
        assert_eq!(config.provider, EmbeddingProviderKind::Hashing);
    }
}
