//! Corpus manifest: bibliographic metadata for each source.

use crate::error::{RagError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Reference metadata for one corpus source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub id: String,
    pub title: String,
    pub authors: String,
    #[serde(deserialize_with = "year_as_string")]
    pub year: String,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(alias = "link_or_DOI", default)]
    pub link: String,
}

/// Years show up both as numbers and as strings ("2017", "n.d.").
fn year_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Number(i64),
        Text(String),
    }

    Ok(match Year::deserialize(deserializer)? {
        Year::Number(n) => n.to_string(),
        Year::Text(s) => s,
    })
}

/// Id-keyed lookup over manifest entries.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    entries: HashMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Load a JSON array of entries.
    ///
    /// A missing file yields an empty manifest; unreadable or malformed
    /// content is an error naming the path.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "manifest not found; reference lists will be empty");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| RagError::io(path, e))?;
        let entries: Vec<ManifestEntry> =
            serde_json::from_str(&content).map_err(|e| RagError::Manifest {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        debug!(path = %path.display(), entries = entries.len(), "loaded manifest");
        Ok(Self::new(entries))
    }

    pub fn get(&self, source_id: &str) -> Option<&ManifestEntry> {
        self.entries.get(source_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
