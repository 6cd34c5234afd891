//! Persistence for chunk stores and query logs.
//!
//! Both are newline-delimited JSON: one record per line, UTF-8, appended to
//! without rewriting earlier lines.

use crate::chunker::Chunk;
use crate::citations::extract_citations;
use crate::error::{RagError, Result};
use crate::pipeline::{QueryMetadata, QueryResult};
use chrono::Local;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| RagError::io(parent, e))?;
        }
    }
    Ok(())
}

/// Write `records` to `path`, replacing any existing file.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|e| RagError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    for record in records {
        let line = serde_json::to_string(record)
            .map_err(|e| RagError::Serialization(e.to_string()))?;
        writeln!(writer, "{}", line).map_err(|e| RagError::io(path, e))?;
    }

    writer.flush().map_err(|e| RagError::io(path, e))
}

/// Append one record as a single line, creating the file if needed.
pub fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    ensure_parent(path)?;
    let line =
        serde_json::to_string(record).map_err(|e| RagError::Serialization(e.to_string()))?;

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RagError::io(path, e))?;
    writeln!(file, "{}", line).map_err(|e| RagError::io(path, e))
}

/// Read every record of a JSONL file. Blank lines are skipped.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).map_err(|e| RagError::io(path, e))?;
    let mut records = Vec::new();

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| RagError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            RagError::Serialization(format!("{}:{}: {}", path.display(), line_no + 1, e))
        })?;
        records.push(record);
    }

    Ok(records)
}

/// Write the chunk store.
pub fn save_chunks(path: &Path, chunks: &[Chunk]) -> Result<()> {
    write_jsonl(path, chunks)
}

/// Read the chunk store. A missing file is an [`RagError::Io`] naming the path.
pub fn load_chunks(path: &Path) -> Result<Vec<Chunk>> {
    read_jsonl(path)
}

#[derive(Debug, Serialize)]
struct LoggedChunk<'a> {
    chunk_id: &'a str,
    source_id: &'a str,
    similarity_score: Option<f32>,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct QueryLogEntry<'a> {
    timestamp: String,
    query: &'a str,
    answer: &'a str,
    model: &'a str,
    prompt_version: &'a str,
    retrieved_chunks: Vec<LoggedChunk<'a>>,
    citations_found: Vec<String>,
    metadata: &'a QueryMetadata,
}

/// Append-only log of answered queries.
#[derive(Debug, Clone)]
pub struct QueryLogger {
    path: PathBuf,
}

impl QueryLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, result: &QueryResult) -> Result<()> {
        let entry = QueryLogEntry {
            timestamp: Local::now().to_rfc3339(),
            query: &result.query,
            answer: &result.answer,
            model: &result.model,
            prompt_version: &result.prompt_version,
            retrieved_chunks: result
                .retrieved_chunks
                .iter()
                .map(|c| LoggedChunk {
                    chunk_id: &c.chunk_id,
                    source_id: &c.source_id,
                    similarity_score: c.similarity_score,
                    text: &c.text,
                })
                .collect(),
            citations_found: extract_citations(&result.answer)
                .iter()
                .map(ToString::to_string)
                .collect(),
            metadata: &result.metadata,
        };

        append_jsonl(&self.path, &entry)
    }
}
