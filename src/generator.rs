//! Citation-constrained answer generation.

use crate::chunker::Chunk;
use crate::error::Result;
use crate::llm::{CompletionBackend, Prompts, RetryPolicy, Sleeper, TokenUsage, TokioSleeper};
use std::sync::Arc;
use tracing::debug;

/// Version tag recorded with every generated answer.
pub const PROMPT_VERSION: &str = "v1.0_baseline";

/// A generated answer plus the bookkeeping logged alongside it.
#[derive(Debug, Clone)]
pub struct Generation {
    pub answer: String,
    pub model: String,
    pub prompt_version: String,
    pub usage: TokenUsage,
}

/// Builds the evidence prompt and calls the completion backend under a retry policy.
pub struct Generator {
    backend: Arc<dyn CompletionBackend>,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl Generator {
    pub fn new(backend: Arc<dyn CompletionBackend>, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the sleeper used between retries.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    /// Generate an answer to `query` grounded in `chunks`.
    ///
    /// Retryable failures are retried per the policy; the last error is
    /// returned once the policy gives up. No partial answer is produced.
    pub async fn generate(&self, query: &str, chunks: &[Chunk]) -> Result<Generation> {
        let chunk_text = format_chunks(chunks);
        let user_prompt = Prompts::fill(
            Prompts::answer_user(),
            &[("query", query), ("chunks", &chunk_text)],
        );

        let backend = self.backend.as_ref();
        let prompt = user_prompt.as_str();
        let response = self
            .retry
            .execute(self.sleeper.as_ref(), move || {
                backend.complete(Some(Prompts::answer_system()), prompt)
            })
            .await?;

        let usage = response.usage.unwrap_or_default();
        debug!(
            chunks = chunks.len(),
            total_tokens = usage.total_tokens,
            "generated answer"
        );

        Ok(Generation {
            answer: response.content,
            model: self.backend.model().to_string(),
            prompt_version: PROMPT_VERSION.to_string(),
            usage,
        })
    }
}

/// Render chunks as numbered evidence blocks tagged with their citation id.
pub fn format_chunks(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let score = chunk
                .similarity_score
                .map(|s| format!("{:.4}", s))
                .unwrap_or_else(|| "N/A".to_string());
            format!(
                "[CHUNK {}]\nCitation ID: ({}, {})\nSimilarity Score: {}\nText: {}\n",
                i + 1,
                chunk.source_id,
                chunk.chunk_id,
                score,
                chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
