//! Configuration for the retrieval pipeline.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{RagError, Result};
use crate::llm::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// LLM configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL for the LLM API (e.g., "https://api.openai.com")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Model name (e.g., "gpt-4o-mini")
    pub model: String,

    /// Maximum tokens for response
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 2048,
            temperature: 0.1,
            timeout_secs: 120,
        }
    }
}

/// Which embedding capability to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Api,
    /// Local sentence-transformers model (requires the `local-embeddings` feature).
    Local,
}

/// Embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub api_base: String,
    pub api_key: String,
    /// Model name or Hugging Face model id for the local provider.
    pub model: String,
    /// Texts per embedding request while building the index.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Api,
            api_base: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_string(),
            batch_size: 32,
        }
    }
}

/// Sliding-window chunking parameters, in tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Maximum tokens per chunk.
    pub chunk_size: usize,
    /// Tokens shared by consecutive chunks.
    pub overlap: usize,
    /// Hugging Face repo whose `tokenizer.json` defines a token (e.g.
    /// `Xenova/gpt-4`). Unset or `whitespace` counts whitespace-delimited
    /// words. Needs the `local-embeddings` feature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 512,
            overlap: 128,
            tokenizer: None,
        }
    }
}

impl ChunkConfig {
    /// Reject windows that would never advance.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Distance between consecutive window starts.
    pub fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per query.
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { top_k: 5 }
    }
}

/// Backoff settings for completion calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_secs: f64,
    pub max_delay_secs: f64,
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_secs: 1.0,
            max_delay_secs: 60.0,
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// Reject delays that cannot become a [`Duration`] and bases that would
    /// shrink or blow up the backoff.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("initial_delay_secs", self.initial_delay_secs),
            ("max_delay_secs", self.max_delay_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(RagError::InvalidConfig(format!(
                    "retry.{} must be a finite, non-negative number of seconds (got {})",
                    name, value
                )));
            }
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(RagError::InvalidConfig(format!(
                "retry.exponential_base must be finite and at least 1 (got {})",
                self.exponential_base
            )));
        }
        if self.max_delay_secs < self.initial_delay_secs {
            return Err(RagError::InvalidConfig(format!(
                "retry.max_delay_secs ({}) must not be below initial_delay_secs ({})",
                self.max_delay_secs, self.initial_delay_secs
            )));
        }
        Ok(())
    }

    /// Build the runtime retry policy. Out-of-range values are clamped; call
    /// [`RetryConfig::validate`] to reject them instead.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: seconds(self.initial_delay_secs),
            max_delay: seconds(self.max_delay_secs),
            exponential_base: self.exponential_base,
        }
    }
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Locations of on-disk artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub chunks: PathBuf,
    pub index_dir: PathBuf,
    pub manifest: PathBuf,
    pub query_log: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            chunks: PathBuf::from("data/processed/chunks.jsonl"),
            index_dir: PathBuf::from("data/processed/vector_index"),
            manifest: PathBuf::from("data/data_manifest.json"),
            query_log: PathBuf::from("logs/query_logs.jsonl"),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkConfig,
    pub retrieval: RetrievalConfig,
    pub retry: RetryConfig,
    pub paths: PathsConfig,
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_API_BASE, LLM_API_KEY, LLM_MODEL, ...)
    /// 2. Config file (~/.config/citation-rag/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_file_path() {
            Some(path) if path.exists() => Self::load_from_file(&path)?,
            _ => Config::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit file, then apply environment overrides.
    pub fn load_with_file(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let mut config = Self::load_from_file(path)?;
                config.apply_env();
                Ok(config)
            }
            None => Self::load(),
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;

        serde_yaml::from_str(&content)
            .map_err(|e| RagError::Config(format!("Failed to parse config file: {}", e)))
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }

        if let Ok(api_key) = env::var("LLM_API_KEY").or_else(|_| env::var("OPENAI_API_KEY")) {
            self.llm.api_key = api_key;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(tokens) = env::var("LLM_MAX_TOKENS").ok().and_then(|v| v.parse().ok()) {
            self.llm.max_tokens = tokens;
        }

        if let Some(temp) = env::var("LLM_TEMPERATURE").ok().and_then(|v| v.parse().ok()) {
            self.llm.temperature = temp;
        }

        if let Ok(api_base) = env::var("EMBEDDING_API_BASE") {
            self.embedding.api_base = api_base;
        }

        // The embedding endpoint usually shares the completion key.
        match env::var("EMBEDDING_API_KEY") {
            Ok(key) => self.embedding.api_key = key,
            Err(_) if self.embedding.api_key.is_empty() => {
                self.embedding.api_key = self.llm.api_key.clone();
            }
            Err(_) => {}
        }

        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "citation-rag")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate that required configuration is present.
    pub fn validate(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(RagError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.api_key.is_empty() {
            return Err(RagError::Config(
                "LLM API key is required. Set LLM_API_KEY environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(RagError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        self.chunking.validate()?;
        self.retry.validate()?;

        if self.retrieval.top_k == 0 {
            return Err(RagError::InvalidConfig("top_k must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Create a config from explicit values (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
