//! Embedding capabilities.
//!
//! The index and retriever only see the [`Embedder`] trait. Two backends are
//! provided: an OpenAI-compatible HTTP endpoint and, behind the
//! `local-embeddings` feature, a local sentence-transformers model.

mod api;
#[cfg(feature = "local-embeddings")]
mod local;

pub use api::ApiEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::{HfTokenizer, LocalEmbeddingModel};

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use crate::error::{RagError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Turns text into dense vectors.
///
/// Build-time and query-time embedders must be the same model; nothing here
/// can detect a mismatch.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RagError::Embedding("embedding backend returned no vectors".to_string()))
    }
}

/// Build the embedder selected by `config.provider`.
pub fn from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProvider::Api => Ok(Arc::new(ApiEmbedder::new(config.clone()))),
        #[cfg(feature = "local-embeddings")]
        EmbeddingProvider::Local => {
            let model = if config.model.contains('/') {
                LocalEmbeddingModel::load(&config.model)?
            } else {
                LocalEmbeddingModel::load_minilm()?
            };
            Ok(Arc::new(model))
        }
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingProvider::Local => Err(RagError::InvalidConfig(
            "local embeddings require the `local-embeddings` feature".to_string(),
        )),
    }
}

/// Scale a vector to unit length in place. Zero vectors are left alone.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

/// Dot product of two equal-length vectors.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
