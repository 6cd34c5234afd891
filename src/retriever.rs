//! Query-time retrieval over a loaded [`VectorIndex`].

use crate::chunker::Chunk;
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::index::VectorIndex;
use std::sync::Arc;
use tracing::debug;

/// Embeds a query and searches the index.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: VectorIndex,
}

impl Retriever {
    /// The embedder must be the one the index was built with.
    pub fn new(embedder: Arc<dyn Embedder>, index: VectorIndex) -> Self {
        Self { embedder, index }
    }

    /// Top-`k` chunks for `query`, sorted by descending similarity.
    ///
    /// Embedding and search failures are returned as-is; nothing is retried.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<Chunk>> {
        let query_embedding = self.embedder.embed(query).await?;
        let chunks = self.index.search(&query_embedding, k)?;
        debug!(k, returned = chunks.len(), "retrieved chunks");
        Ok(chunks)
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RagError;
    use async_trait::async_trait;

    /// Deterministic embedder: one axis per keyword.
    pub(crate) struct KeywordEmbedder {
        pub keywords: Vec<&'static str>,
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    self.keywords
                        .iter()
                        .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            Err(RagError::Embedding("model unavailable".to_string()))
        }
    }

    pub(crate) fn chunk(source: &str, n: usize, text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("{}_chunk_{:03}", source, n),
            source_id: source.to_string(),
            text: text.to_string(),
            token_count: text.split_whitespace().count(),
            start_char: 0,
            end_char: text.chars().count(),
            similarity_score: None,
        }
    }

    #[tokio::test]
    async fn test_retrieve_ranks_matching_chunk_first() {
        let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder {
            keywords: vec!["sleep", "anxiety", "caffeine"],
        });
        let chunks = vec![
            chunk("walker_2017", 1, "Caffeine delays sleep onset"),
            chunk("ohayon_2004", 1, "Short sleep predicts anxiety"),
            chunk("ohayon_2004", 2, "Methods section"),
        ];
        let index = VectorIndex::build(chunks, embedder.as_ref(), 2).await.unwrap();
        let retriever = Retriever::new(embedder, index);

        let results = retriever
            .retrieve("How is sleep related to anxiety?", 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "ohayon_2004_chunk_001");
        assert!(results[0].similarity_score.unwrap() > results[1].similarity_score.unwrap());
    }

    #[tokio::test]
    async fn test_embedding_failure_surfaces() {
        let index = VectorIndex::new(3);
        let retriever = Retriever::new(Arc::new(FailingEmbedder), index);
        let err = retriever.retrieve("anything", 5).await.unwrap_err();
        assert!(matches!(err, RagError::Embedding(_)));
    }
}
