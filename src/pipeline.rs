//! End-to-end query answering: retrieve, generate, validate, log.

use crate::chunker::Chunk;
use crate::citations::{Citation, CitationValidator, extract_citations};
use crate::config::Config;
use crate::embeddings;
use crate::error::Result;
use crate::generator::Generator;
use crate::index::VectorIndex;
use crate::llm::LlmClient;
use crate::manifest::Manifest;
use crate::persistence::QueryLogger;
use crate::retriever::Retriever;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Retrieval and token accounting for one answered query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryMetadata {
    pub num_chunks_retrieved: usize,
    pub retrieval_method: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Everything produced for one query.
///
/// The validation fields are only meaningful when `enhanced` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    /// Sorted by descending similarity.
    pub retrieved_chunks: Vec<Chunk>,
    pub answer: String,
    pub model: String,
    pub prompt_version: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub enhanced: bool,
    #[serde(default)]
    pub citation_validation_passed: bool,
    #[serde(default)]
    pub invalid_citations: Vec<Citation>,
    #[serde(default)]
    pub reference_list: String,
    #[serde(default)]
    pub num_unique_sources: usize,
    #[serde(default)]
    pub metadata: QueryMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase1_task: Option<String>,
}

/// Retriever, generator and optional citation validator wired together.
pub struct RagPipeline {
    retriever: Retriever,
    generator: Generator,
    validator: Option<CitationValidator>,
    logger: Option<QueryLogger>,
}

impl RagPipeline {
    pub fn new(retriever: Retriever, generator: Generator) -> Self {
        Self {
            retriever,
            generator,
            validator: None,
            logger: None,
        }
    }

    pub fn with_validator(mut self, validator: CitationValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_logger(mut self, logger: QueryLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Load the index and manifest named in `config` and connect the backends.
    pub fn from_config(config: &Config) -> Result<Self> {
        let index = VectorIndex::load(&config.paths.index_dir)?;
        let embedder = embeddings::from_config(&config.embedding)?;
        let backend = Arc::new(LlmClient::new(config.llm.clone()));
        let manifest = Manifest::load(&config.paths.manifest)?;

        info!(
            chunks = index.len(),
            dimension = index.dimension(),
            sources = manifest.len(),
            model = %config.llm.model,
            "pipeline ready"
        );

        Ok(Self::new(
            Retriever::new(embedder, index),
            Generator::new(backend, config.retry.policy()),
        )
        .with_validator(CitationValidator::new(Arc::new(manifest))))
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer `query` from the top `k` chunks.
    ///
    /// With `enhance`, the answer's citations are validated and a reference
    /// list is attached. Retrieval and generation errors fail the query;
    /// a failure to write the query log does not.
    pub async fn query(&self, query: &str, k: usize, enhance: bool) -> Result<QueryResult> {
        let chunks = self.retriever.retrieve(query, k).await?;
        let generation = self.generator.generate(query, &chunks).await?;

        let mut result = QueryResult {
            query: query.to_string(),
            citations: extract_citations(&generation.answer),
            metadata: QueryMetadata {
                num_chunks_retrieved: chunks.len(),
                retrieval_method: "dense".to_string(),
                prompt_tokens: generation.usage.prompt_tokens,
                completion_tokens: generation.usage.completion_tokens,
                total_tokens: generation.usage.total_tokens,
            },
            retrieved_chunks: chunks,
            answer: generation.answer,
            model: generation.model,
            prompt_version: generation.prompt_version,
            enhanced: false,
            citation_validation_passed: false,
            invalid_citations: Vec::new(),
            reference_list: String::new(),
            num_unique_sources: 0,
            query_id: None,
            category: None,
            phase1_task: None,
        };

        if enhance {
            match &self.validator {
                Some(validator) => result = validator.enhance(result),
                None => warn!("citation enhancement requested but no validator is configured"),
            }
        }

        if let Some(logger) = &self.logger {
            if let Err(e) = logger.log(&result) {
                warn!(error = %e, path = %logger.path().display(), "failed to write query log");
            }
        }

        Ok(result)
    }
}
