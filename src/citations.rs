//! Citation extraction, validation and reference lists.
//!
//! A citation is the literal text `(source_id, chunk_id)` where both ids are
//! lowercase ASCII alphanumerics or underscores. Anything else in an answer
//! is not a citation and is ignored.

use crate::chunker::Chunk;
use crate::error::RagError;
use crate::manifest::Manifest;
use crate::pipeline::QueryResult;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock};

static CITATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(([a-z0-9_]+),\s*([a-z0-9_]+)\)").expect("citation pattern is valid")
});

/// A `(source_id, chunk_id)` reference found in answer text.
///
/// Serialized as its display form, e.g. `"(walker_2017, walker_2017_chunk_004)"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Citation {
    pub source_id: String,
    pub chunk_id: String,
}

impl Citation {
    pub fn new(source_id: impl Into<String>, chunk_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            chunk_id: chunk_id.into(),
        }
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.source_id, self.chunk_id)
    }
}

impl From<Citation> for String {
    fn from(citation: Citation) -> Self {
        citation.to_string()
    }
}

impl TryFrom<String> for Citation {
    type Error = RagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        CITATION_PATTERN
            .captures(trimmed)
            .filter(|caps| caps.get(0).is_some_and(|m| m.as_str() == trimmed))
            .map(|caps| Citation::new(&caps[1], &caps[2]))
            .ok_or_else(|| RagError::Serialization(format!("not a citation: {}", value)))
    }
}

/// Every citation in `text`, in order of appearance, duplicates kept.
pub fn extract_citations(text: &str) -> Vec<Citation> {
    CITATION_PATTERN
        .captures_iter(text)
        .map(|caps| Citation::new(&caps[1], &caps[2]))
        .collect()
}

/// Outcome of checking citations against the retrieved chunks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub valid: Vec<Citation>,
    pub invalid: Vec<Citation>,
    pub passed: bool,
}

impl ValidationReport {
    pub fn total(&self) -> usize {
        self.valid.len() + self.invalid.len()
    }
}

/// Split the citations in `answer` by whether their chunk was retrieved.
///
/// Only the chunk id is checked; the source id half is not compared.
pub fn validate(answer: &str, retrieved_chunks: &[Chunk]) -> ValidationReport {
    let retrieved: HashSet<&str> = retrieved_chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    let (valid, invalid): (Vec<_>, Vec<_>) = extract_citations(answer)
        .into_iter()
        .partition(|citation| retrieved.contains(citation.chunk_id.as_str()));

    ValidationReport {
        passed: invalid.is_empty(),
        valid,
        invalid,
    }
}

/// Rendered bibliography for a set of citations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceList {
    /// One line per cited source found in the manifest, sorted by source id.
    pub text: String,
    /// Distinct cited source ids, including ones missing from the manifest.
    pub num_unique_sources: usize,
}

/// Validates answers and renders reference lists from a manifest.
#[derive(Debug, Clone, Default)]
pub struct CitationValidator {
    manifest: Arc<Manifest>,
}

impl CitationValidator {
    pub fn new(manifest: Arc<Manifest>) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn build_reference_list(&self, citations: &[Citation]) -> ReferenceList {
        let source_ids: BTreeSet<&str> = citations.iter().map(|c| c.source_id.as_str()).collect();

        let lines: Vec<String> = source_ids
            .iter()
            .filter_map(|id| {
                self.manifest.get(id).map(|entry| {
                    let venue = entry
                        .venue
                        .as_deref()
                        .filter(|v| !v.is_empty())
                        .unwrap_or("Various");
                    format!(
                        "{}: {} ({}). {}. {}. {}",
                        id, entry.authors, entry.year, entry.title, venue, entry.link
                    )
                })
            })
            .collect();

        ReferenceList {
            text: lines.join("\n"),
            num_unique_sources: source_ids.len(),
        }
    }

    /// Fill the validation and reference fields of `result`.
    ///
    /// Query, chunks, answer and metadata are left untouched.
    pub fn enhance(&self, mut result: QueryResult) -> QueryResult {
        let report = validate(&result.answer, &result.retrieved_chunks);
        let citations = extract_citations(&result.answer);
        let references = self.build_reference_list(&citations);

        result.citations = citations;
        result.enhanced = true;
        result.citation_validation_passed = report.passed;
        result.invalid_citations = report.invalid;
        result.reference_list = references.text;
        result.num_unique_sources = references.num_unique_sources;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use crate::pipeline::tests::sample_result;
    use crate::retriever::tests::chunk;

    fn entry(id: &str, venue: Option<&str>) -> ManifestEntry {
        ManifestEntry {
            id: id.to_string(),
            title: format!("Title of {}", id),
            authors: "Smith, J.".to_string(),
            year: "2020".to_string(),
            venue: venue.map(String::from),
            link: format!("https://doi.org/{}", id),
        }
    }

    fn validator() -> CitationValidator {
        CitationValidator::new(Arc::new(Manifest::new(vec![
            entry("alpha_2019", Some("Sleep")),
            entry("beta_2020", None),
        ])))
    }

    #[test]
    fn test_extract_in_order_with_duplicates() {
        let text = "A (alpha_2019, a_1). B (beta_2020,b_2). Again (alpha_2019, a_1).";
        let citations = extract_citations(text);
        assert_eq!(
            citations,
            vec![
                Citation::new("alpha_2019", "a_1"),
                Citation::new("beta_2020", "b_2"),
                Citation::new("alpha_2019", "a_1"),
            ]
        );
    }

    #[test]
    fn test_malformed_citations_are_invisible() {
        let text = "(Alpha_2019, a_1) (alpha-2019, a_1) [alpha, a_1] (alpha a_1) (only_one)";
        assert!(extract_citations(text).is_empty());
    }

    #[test]
    fn test_validate_one_valid_one_invalid() {
        let chunks = vec![chunk("src", 1, "evidence")];
        let answer = "Claim (src, src_chunk_001). Other claim (src, src_chunk_999).";

        let report = validate(answer, &chunks);

        assert_eq!(report.valid, vec![Citation::new("src", "src_chunk_001")]);
        assert_eq!(report.invalid, vec![Citation::new("src", "src_chunk_999")]);
        assert_eq!(report.total(), 2);
        assert!(!report.passed);
    }

    #[test]
    fn test_validate_without_citations_passes() {
        let report = validate("No citations here.", &[chunk("src", 1, "x")]);
        assert_eq!(report.total(), 0);
        assert!(report.passed);
    }

    #[test]
    fn test_reference_list_sorted_and_deterministic() {
        let validator = validator();
        let forward = vec![
            Citation::new("beta_2020", "b_1"),
            Citation::new("alpha_2019", "a_1"),
            Citation::new("beta_2020", "b_2"),
        ];
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = validator.build_reference_list(&forward);
        let b = validator.build_reference_list(&reversed);

        assert_eq!(a, b);
        assert_eq!(
            a.text,
            "alpha_2019: Smith, J. (2020). Title of alpha_2019. Sleep. https://doi.org/alpha_2019\n\
             beta_2020: Smith, J. (2020). Title of beta_2020. Various. https://doi.org/beta_2020"
        );
        assert_eq!(a.num_unique_sources, 2);
    }

    #[test]
    fn test_unknown_source_counted_but_not_rendered() {
        let validator = validator();
        let refs = validator.build_reference_list(&[
            Citation::new("alpha_2019", "a_1"),
            Citation::new("ghost_1999", "g_1"),
        ]);
        assert_eq!(refs.num_unique_sources, 2);
        assert_eq!(refs.text.lines().count(), 1);
        assert!(!refs.text.contains("ghost_1999"));
    }

    #[test]
    fn test_enhance_fills_fields_only() {
        let mut result = sample_result(
            "Finding (alpha_2019, alpha_2019_chunk_001). Made up (alpha_2019, alpha_2019_chunk_042).",
        );
        result.retrieved_chunks = vec![chunk("alpha_2019", 1, "finding")];
        let before = result.clone();

        let enhanced = validator().enhance(result);

        assert!(enhanced.enhanced);
        assert!(!enhanced.citation_validation_passed);
        assert_eq!(
            enhanced.invalid_citations,
            vec![Citation::new("alpha_2019", "alpha_2019_chunk_042")]
        );
        assert_eq!(enhanced.citations.len(), 2);
        assert_eq!(enhanced.num_unique_sources, 1);
        assert!(enhanced.reference_list.starts_with("alpha_2019: "));
        assert_eq!(enhanced.query, before.query);
        assert_eq!(enhanced.answer, before.answer);
        assert_eq!(enhanced.retrieved_chunks, before.retrieved_chunks);
        assert_eq!(enhanced.metadata, before.metadata);
    }

    #[test]
    fn test_citation_serializes_as_text() {
        let citation = Citation::new("alpha_2019", "alpha_2019_chunk_001");
        let json = serde_json::to_string(&citation).unwrap();
        assert_eq!(json, r#""(alpha_2019, alpha_2019_chunk_001)""#);

        let parsed: Citation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, citation);
        assert!(serde_json::from_str::<Citation>(r#""not a citation""#).is_err());
    }
}
