//! Exact nearest-neighbour index over unit-normalized embeddings.
//!
//! Each entry owns both its vector and its chunk, so the two can never drift
//! apart. On disk the index is two artifacts in one directory: `index.bin`
//! (bincode vectors) and `metadata.json` (chunks in the same order). Loading
//! rejects a pair whose counts disagree.

use crate::chunker::Chunk;
use crate::embeddings::{Embedder, inner_product, normalize};
use crate::error::{RagError, Result};
use bincode::{Decode, Encode};
use std::fs;
use std::path::Path;
use tracing::info;

pub const VECTORS_FILENAME: &str = "index.bin";
pub const METADATA_FILENAME: &str = "metadata.json";

/// A stored vector together with the chunk it embeds.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Encode, Decode)]
struct StoredVectors {
    dimension: u32,
    vectors: Vec<Vec<f32>>,
}

/// Flat inner-product index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Create an empty index for vectors of the given width.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: Vec::new(),
        }
    }

    /// Embed chunks in batches and build a fresh index.
    ///
    /// The dimension is taken from the first batch.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Self> {
        if chunks.is_empty() {
            return Err(RagError::InvalidConfig("no chunks to index".to_string()));
        }

        let mut index: Option<VectorIndex> = None;
        let total = chunks.len();

        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
            let embeddings = embedder.embed_batch(&texts).await?;

            let index = index.get_or_insert_with(|| {
                VectorIndex::new(embeddings.first().map(Vec::len).unwrap_or(0))
            });
            index.add(batch.to_vec(), embeddings)?;

            info!(indexed = index.len(), total, "embedded batch");
        }

        index.ok_or_else(|| RagError::InvalidConfig("no chunks to index".to_string()))
    }

    /// Add chunks with their embeddings.
    ///
    /// The whole batch is checked before anything is inserted, so a bad batch
    /// leaves the index unchanged.
    pub fn add(&mut self, chunks: Vec<Chunk>, embeddings: Vec<Vec<f32>>) -> Result<()> {
        if chunks.len() != embeddings.len() {
            return Err(RagError::InvalidConfig(format!(
                "{} chunks but {} embeddings",
                chunks.len(),
                embeddings.len()
            )));
        }

        if let Some(bad) = embeddings.iter().find(|e| e.len() != self.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }

        self.entries
            .extend(chunks.into_iter().zip(embeddings).map(|(chunk, mut embedding)| {
                normalize(&mut embedding);
                IndexEntry { chunk, embedding }
            }));

        Ok(())
    }

    /// Top-`k` chunks by cosine similarity, best first.
    ///
    /// Ties keep insertion order. `k` larger than the index returns every entry.
    pub fn search(&self, query_embedding: &[f32], k: usize) -> Result<Vec<Chunk>> {
        if query_embedding.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query_embedding.len(),
            });
        }

        let mut query = query_embedding.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, inner_product(&query, &entry.embedding)))
            .collect();

        // Stable sort: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| self.entries[i].chunk.with_score(score))
            .collect())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of vectors in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get all entries.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Write `index.bin` and `metadata.json` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| RagError::io(dir, e))?;

        let stored = StoredVectors {
            dimension: self.dimension as u32,
            vectors: self.entries.iter().map(|e| e.embedding.clone()).collect(),
        };
        let bytes = bincode::encode_to_vec(&stored, bincode::config::standard())
            .map_err(|e| RagError::Serialization(e.to_string()))?;
        let vectors_path = dir.join(VECTORS_FILENAME);
        fs::write(&vectors_path, bytes).map_err(|e| RagError::io(&vectors_path, e))?;

        let chunks: Vec<&Chunk> = self.entries.iter().map(|e| &e.chunk).collect();
        let metadata = serde_json::to_vec(&chunks)
            .map_err(|e| RagError::Serialization(e.to_string()))?;
        let metadata_path = dir.join(METADATA_FILENAME);
        fs::write(&metadata_path, metadata).map_err(|e| RagError::io(&metadata_path, e))?;

        info!(vectors = self.len(), path = %dir.display(), "saved index");
        Ok(())
    }

    /// Load an index saved by [`VectorIndex::save`].
    pub fn load(dir: &Path) -> Result<Self> {
        let vectors_path = dir.join(VECTORS_FILENAME);
        let metadata_path = dir.join(METADATA_FILENAME);

        if !vectors_path.is_file() || !metadata_path.is_file() {
            return Err(RagError::IndexNotFound(dir.to_path_buf()));
        }

        let bytes = fs::read(&vectors_path).map_err(|e| RagError::io(&vectors_path, e))?;
        let (stored, _): (StoredVectors, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| RagError::Serialization(e.to_string()))?;

        let metadata = fs::read(&metadata_path).map_err(|e| RagError::io(&metadata_path, e))?;
        let chunks: Vec<Chunk> = serde_json::from_slice(&metadata)
            .map_err(|e| RagError::Serialization(e.to_string()))?;

        if chunks.len() != stored.vectors.len() {
            return Err(RagError::IndexMismatch {
                path: dir.to_path_buf(),
                message: format!(
                    "{} vectors but {} metadata records",
                    stored.vectors.len(),
                    chunks.len()
                ),
            });
        }

        let dimension = stored.dimension as usize;
        if stored.vectors.iter().any(|v| v.len() != dimension) {
            return Err(RagError::IndexMismatch {
                path: dir.to_path_buf(),
                message: format!("vector width differs from dimension {}", dimension),
            });
        }

        let entries = chunks
            .into_iter()
            .zip(stored.vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();

        let index = Self { dimension, entries };
        info!(vectors = index.len(), dimension, path = %dir.display(), "loaded index");
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunk(id: &str) -> Chunk {
        Chunk {
            chunk_id: id.to_string(),
            source_id: "src".to_string(),
            text: format!("text of {}", id),
            token_count: 3,
            start_char: 0,
            end_char: 10,
            similarity_score: None,
        }
    }

    fn sample_index() -> VectorIndex {
        let mut index = VectorIndex::new(3);
        index
            .add(
                vec![chunk("a"), chunk("b"), chunk("c")],
                vec![
                    vec![1.0, 0.0, 0.0],
                    vec![0.0, 1.0, 0.0],
                    vec![0.7, 0.7, 0.0],
                ],
            )
            .unwrap();
        index
    }

    #[test]
    fn test_search_orders_by_similarity() {
        let index = sample_index();
        let results = index.search(&[1.0, 0.1, 0.0], 3).unwrap();

        let ids: Vec<&str> = results.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);

        let scores: Vec<f32> = results.iter().map(|c| c.similarity_score.unwrap()).collect();
        assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_k_larger_than_index_returns_all() {
        let index = sample_index();
        assert_eq!(index.search(&[0.0, 0.0, 1.0], 10).unwrap().len(), 3);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = VectorIndex::new(2);
        index
            .add(
                vec![chunk("first"), chunk("second"), chunk("third")],
                vec![vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]],
            )
            .unwrap();

        let ids: Vec<String> = index
            .search(&[1.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_add_rejects_dimension_mismatch_without_partial_write() {
        let mut index = sample_index();
        let result = index.add(
            vec![chunk("d"), chunk("e")],
            vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0]],
        );
        assert!(matches!(
            result,
            Err(RagError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_add_rejects_count_mismatch() {
        let mut index = VectorIndex::new(2);
        let result = index.add(vec![chunk("a")], vec![]);
        assert!(result.is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let index = sample_index();
        index.save(dir.path()).unwrap();

        let loaded = VectorIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.dimension(), 3);

        let before = index.search(&[0.2, 0.9, 0.0], 2).unwrap();
        let after = loaded.search(&[0.2, 0.9, 0.0], 2).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_load_rejects_count_mismatch() {
        let dir = TempDir::new().unwrap();
        sample_index().save(dir.path()).unwrap();

        let chunks = vec![chunk("a"), chunk("b")];
        fs::write(
            dir.path().join(METADATA_FILENAME),
            serde_json::to_vec(&chunks).unwrap(),
        )
        .unwrap();

        assert!(matches!(
            VectorIndex::load(dir.path()),
            Err(RagError::IndexMismatch { .. })
        ));
    }

    #[test]
    fn test_load_missing_index() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            VectorIndex::load(dir.path()),
            Err(RagError::IndexNotFound(_))
        ));
    }
}
