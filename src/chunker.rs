//! Sliding-window chunking over token sequences.
//!
//! A text is tokenized once, then cut into windows of `chunk_size` tokens
//! whose starts advance by `chunk_size - overlap`. The last window may be
//! shorter. Character offsets are recovered by decoding token prefixes, which
//! is only an approximation for tokenizers that normalize text on decode
//! (subword tokenizers may drop or rewrite whitespace). With
//! [`WhitespaceTokenizer`] the offsets are exact.

use crate::config::ChunkConfig;
use crate::error::{RagError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// File extensions picked up from a corpus directory.
pub const CORPUS_EXTENSIONS: [&str; 2] = ["txt", "md"];

/// A window of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// `{source_id}_chunk_{n:03}`, unique within a source.
    pub chunk_id: String,
    pub source_id: String,
    pub text: String,
    pub token_count: usize,
    /// Approximate character offset of the window start.
    pub start_char: usize,
    /// Approximate character offset of the window end.
    pub end_char: usize,
    /// Similarity to the query, set only on search results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
}

impl Chunk {
    /// Copy of this chunk annotated with a search score.
    pub fn with_score(&self, score: f32) -> Self {
        Self {
            similarity_score: Some(score),
            ..self.clone()
        }
    }
}

/// Converts text to and from a token sequence.
pub trait Tokenizer {
    type Token: Clone;

    fn encode(&self, text: &str) -> Result<Vec<Self::Token>>;

    fn decode(&self, tokens: &[Self::Token]) -> Result<String>;
}

/// Splits on whitespace boundaries; each token keeps its trailing whitespace.
///
/// Leading whitespace is attached to the first token, so concatenating any
/// prefix of tokens reproduces the matching prefix of the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    type Token = String;

    fn encode(&self, text: &str) -> Result<Vec<String>> {
        let mut tokens = Vec::new();
        let mut current = String::new();
        let mut seen_word = false;
        let mut prev_ws = false;

        for c in text.chars() {
            let ws = c.is_whitespace();
            if !ws && prev_ws && seen_word {
                tokens.push(std::mem::take(&mut current));
            }
            if !ws {
                seen_word = true;
            }
            current.push(c);
            prev_ws = ws;
        }

        if !current.is_empty() {
            tokens.push(current);
        }

        Ok(tokens)
    }

    fn decode(&self, tokens: &[String]) -> Result<String> {
        Ok(tokens.concat())
    }
}

/// Builds fixed-size overlapping chunks.
pub struct Chunker<T: Tokenizer> {
    tokenizer: T,
    config: ChunkConfig,
}

impl Chunker<WhitespaceTokenizer> {
    /// Chunker over whitespace-delimited words.
    pub fn whitespace(config: ChunkConfig) -> Result<Self> {
        Self::new(WhitespaceTokenizer, config)
    }
}

impl<T: Tokenizer> Chunker<T> {
    /// Fails fast when `overlap >= chunk_size`, which would never advance.
    pub fn new(tokenizer: T, config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { tokenizer, config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Split `text` into ordered chunks attributed to `source_id`.
    pub fn chunk(&self, text: &str, source_id: &str) -> Result<Vec<Chunk>> {
        let tokens = self.tokenizer.encode(text)?;
        let stride = self.config.stride();

        let mut chunks = Vec::new();
        let mut start = 0;
        let mut chunk_num = 1;

        while start < tokens.len() {
            let end = (start + self.config.chunk_size).min(tokens.len());
            let window = &tokens[start..end];

            let start_char = self.tokenizer.decode(&tokens[..start])?.chars().count();
            let end_char = self.tokenizer.decode(&tokens[..end])?.chars().count();

            chunks.push(Chunk {
                chunk_id: format!("{}_chunk_{:03}", source_id, chunk_num),
                source_id: source_id.to_string(),
                text: self.tokenizer.decode(window)?,
                token_count: window.len(),
                start_char,
                end_char,
                similarity_score: None,
            });

            start += stride;
            chunk_num += 1;
        }

        Ok(chunks)
    }
}

/// Derive a citation-safe source id from a file stem.
///
/// Lowercases and replaces anything outside `[a-z0-9_]` with `_`, so chunk
/// ids built from it match the citation pattern.
pub fn source_id_from_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Text files under `dir` with a corpus extension, sorted by path.
pub fn corpus_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(RagError::InvalidCorpusPath(dir.to_path_buf()));
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| CORPUS_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Chunk every corpus file under `dir`, in path order.
///
/// Each file's source id comes from its stem. Stems that normalize to an
/// id already taken get a `_2`, `_3`, ... suffix. Fails with
/// [`RagError::EmptyCorpus`] when no file yields a chunk.
pub fn chunk_corpus<T: Tokenizer>(dir: &Path, chunker: &Chunker<T>) -> Result<Vec<Chunk>> {
    let files = corpus_files(dir)?;
    let mut chunks = Vec::new();
    let mut taken = HashSet::new();

    for path in &files {
        let content = std::fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled");
        let base = source_id_from_name(stem);
        let source_id = unique_source_id(&base, &mut taken);
        if source_id != base {
            warn!(path = %path.display(), source_id = %source_id, "source id already taken, suffixed");
        }

        let file_chunks = chunker.chunk(&content, &source_id)?;
        debug!(source_id = %source_id, chunks = file_chunks.len(), "chunked file");
        chunks.extend(file_chunks);
    }

    if chunks.is_empty() {
        return Err(RagError::EmptyCorpus(dir.to_path_buf()));
    }

    info!(files = files.len(), chunks = chunks.len(), "chunked corpus");
    Ok(chunks)
}

/// Chunk a corpus with the tokenizer named by `config.tokenizer`.
///
/// A Hugging Face tokenizer is only available with the `local-embeddings`
/// feature; without it a configured repo id is an
/// [`RagError::InvalidConfig`].
pub fn ingest_corpus(dir: &Path, config: &ChunkConfig) -> Result<Vec<Chunk>> {
    config.validate()?;
    match config.tokenizer.as_deref() {
        None | Some("whitespace") => chunk_corpus(dir, &Chunker::whitespace(config.clone())?),
        #[cfg(feature = "local-embeddings")]
        Some(model_id) => {
            info!(tokenizer = model_id, "loading tokenizer");
            let tokenizer = crate::embeddings::HfTokenizer::from_pretrained(model_id)?;
            chunk_corpus(dir, &Chunker::new(tokenizer, config.clone())?)
        }
        #[cfg(not(feature = "local-embeddings"))]
        Some(model_id) => Err(RagError::InvalidConfig(format!(
            "tokenizer '{}' requires the `local-embeddings` feature",
            model_id
        ))),
    }
}

fn unique_source_id(base: &str, taken: &mut HashSet<String>) -> String {
    let mut id = base.to_string();
    let mut n = 2;
    while taken.contains(&id) {
        id = format!("{}_{}", base, n);
        n += 1;
    }
    taken.insert(id.clone());
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ")
    }

    fn chunker(chunk_size: usize, overlap: usize) -> Chunker<WhitespaceTokenizer> {
        Chunker::whitespace(ChunkConfig {
            chunk_size,
            overlap,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_whitespace_tokenizer_is_lossless() {
        let text = "  Sleep  duration\tand\nanxiety. ";
        let tokens = WhitespaceTokenizer.encode(text).unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[0], "  Sleep  ");
        assert_eq!(WhitespaceTokenizer.decode(&tokens).unwrap(), text);
    }

    #[test]
    fn test_window_starts_follow_stride() {
        // chunk_size=10, overlap=3 -> stride 7 over 25 tokens
        let chunks = chunker(10, 3).chunk(&words(25), "doc").unwrap();

        assert_eq!(chunks.len(), 4);
        let counts: Vec<usize> = chunks.iter().map(|c| c.token_count).collect();
        assert_eq!(counts, vec![10, 10, 10, 4]);
        assert!(chunks[0].text.starts_with("w0 "));
        assert!(chunks[1].text.starts_with("w7 "));
        assert!(chunks[2].text.starts_with("w14 "));
        assert!(chunks[3].text.starts_with("w21 "));
        assert_eq!(chunks[3].text, "w21 w22 w23 w24");
    }

    #[test]
    fn test_consecutive_chunks_share_overlap() {
        let chunks = chunker(10, 3).chunk(&words(25), "doc").unwrap();
        let first: Vec<&str> = chunks[0].text.split_whitespace().collect();
        let second: Vec<&str> = chunks[1].text.split_whitespace().collect();
        assert_eq!(&first[7..], &second[..3]);
    }

    #[test]
    fn test_chunk_ids_are_sequence_suffixed() {
        let chunks = chunker(4, 1).chunk(&words(10), "walker_2017").unwrap();
        assert_eq!(chunks[0].chunk_id, "walker_2017_chunk_001");
        assert_eq!(chunks[1].chunk_id, "walker_2017_chunk_002");
        assert!(chunks.iter().all(|c| c.source_id == "walker_2017"));
        assert!(chunks.iter().all(|c| c.similarity_score.is_none()));
    }

    #[test]
    fn test_char_offsets_match_source_text() {
        let text = words(25);
        let chunks = chunker(10, 3).chunk(&text, "doc").unwrap();
        for chunk in &chunks {
            let slice: String = text
                .chars()
                .skip(chunk.start_char)
                .take(chunk.end_char - chunk.start_char)
                .collect();
            assert_eq!(slice, chunk.text);
        }
        assert_eq!(chunks.last().unwrap().end_char, text.chars().count());
    }

    #[test]
    fn test_short_text_yields_single_chunk() {
        let chunks = chunker(512, 128).chunk("A short abstract.", "doc").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].token_count, 3);
        assert_eq!(chunks[0].start_char, 0);
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunker(10, 3).chunk("", "doc").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_overlap_fails_fast() {
        let result = Chunker::whitespace(ChunkConfig {
            chunk_size: 10,
            overlap: 10,
            ..Default::default()
        });
        assert!(matches!(result, Err(RagError::InvalidConfig(_))));

        let result = Chunker::whitespace(ChunkConfig {
            chunk_size: 0,
            overlap: 0,
            ..Default::default()
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_source_id_from_name() {
        assert_eq!(source_id_from_name("Walker-2017 Sleep"), "walker_2017_sleep");
        assert_eq!(source_id_from_name("ohayon_2004"), "ohayon_2004");
    }

    #[test]
    fn test_chunk_corpus_walks_text_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Walker 2017.txt"), words(12)).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/ohayon_2004.md"), words(3)).unwrap();
        std::fs::write(dir.path().join("notes.pdf"), "binary").unwrap();

        let chunks = chunk_corpus(dir.path(), &chunker(10, 3)).unwrap();

        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["walker_2017_chunk_001", "walker_2017_chunk_002", "ohayon_2004_chunk_001"]
        );
    }

    #[test]
    fn test_chunk_corpus_suffixes_colliding_source_ids() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("Walker 2017.txt"), words(3)).unwrap();
        std::fs::write(dir.path().join("walker-2017.md"), words(4)).unwrap();
        std::fs::write(dir.path().join("walker_2017_2.txt"), words(5)).unwrap();

        let chunks = chunk_corpus(dir.path(), &chunker(10, 3)).unwrap();

        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "walker_2017_chunk_001",
                "walker_2017_2_chunk_001",
                "walker_2017_2_2_chunk_001"
            ]
        );
        let unique: HashSet<&str> = chunks.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(unique.len(), 3);
        assert_eq!(chunks[1].token_count, 4);
    }

    #[test]
    fn test_ingest_corpus_defaults_to_whitespace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("walker_2017.txt"), words(12)).unwrap();

        let mut config = ChunkConfig {
            chunk_size: 10,
            overlap: 3,
            tokenizer: None,
        };
        let expected = chunk_corpus(dir.path(), &chunker(10, 3)).unwrap();
        assert_eq!(ingest_corpus(dir.path(), &config).unwrap(), expected);

        config.tokenizer = Some("whitespace".to_string());
        assert_eq!(ingest_corpus(dir.path(), &config).unwrap(), expected);

        config.overlap = 10;
        assert!(matches!(
            ingest_corpus(dir.path(), &config),
            Err(RagError::InvalidConfig(_))
        ));
    }

    #[cfg(not(feature = "local-embeddings"))]
    #[test]
    fn test_ingest_corpus_model_tokenizer_needs_feature() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("walker_2017.txt"), words(12)).unwrap();
        let config = ChunkConfig {
            tokenizer: Some("Xenova/gpt-4".to_string()),
            ..Default::default()
        };

        let err = ingest_corpus(dir.path(), &config).unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));
        assert!(err.to_string().contains("Xenova/gpt-4"));
    }

    #[test]
    fn test_chunk_corpus_errors() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing");
        assert!(matches!(
            chunk_corpus(&missing, &chunker(10, 3)),
            Err(RagError::InvalidCorpusPath(_))
        ));

        std::fs::write(dir.path().join("empty.txt"), "").unwrap();
        assert!(matches!(
            chunk_corpus(dir.path(), &chunker(10, 3)),
            Err(RagError::EmptyCorpus(_))
        ));
    }
}
