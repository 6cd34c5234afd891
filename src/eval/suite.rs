//! Evaluation query suites.
//!
//! A suite is a JSON object whose array-valued keys are named groups of
//! queries, e.g. `direct_queries`, `synthesis_queries`, `edge_case_queries`.
//! Other keys (descriptions, version tags) are ignored.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// One evaluation query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryItem {
    pub id: String,
    pub query: String,
    pub category: String,
    /// Task tag such as `CEE` or `CSS`; absent for general queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase1_task: Option<String>,
}

/// Queries grouped under named categories, in document order.
#[derive(Debug, Clone, Default)]
pub struct QuerySuite {
    groups: Vec<(String, Vec<QueryItem>)>,
}

impl QuerySuite {
    pub fn new(groups: Vec<(String, Vec<QueryItem>)>) -> Self {
        Self { groups }
    }

    /// Load a suite from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read query suite: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Invalid query suite: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(content).context("Failed to parse query suite JSON")?;
        let Value::Object(map) = value else {
            bail!("query suite must be a JSON object of query groups");
        };

        let mut groups = Vec::new();
        for (name, value) in map {
            if !value.is_array() {
                continue;
            }
            let items: Vec<QueryItem> = serde_json::from_value(value)
                .with_context(|| format!("Malformed query in group '{}'", name))?;
            groups.push((name, items));
        }

        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[(String, Vec<QueryItem>)] {
        &self.groups
    }

    /// All queries, group by group.
    pub fn queries(&self) -> impl Iterator<Item = &QueryItem> {
        self.groups.iter().flat_map(|(_, items)| items.iter())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, items)| items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SUITE: &str = r#"{
        "version": "1.0",
        "synthesis_queries": [
            {"id": "S1", "query": "Compare sources", "category": "synthesis", "phase1_task": "CSS"}
        ],
        "direct_queries": [
            {"id": "D1", "query": "What is sleep latency?", "category": "direct", "phase1_task": "CEE"},
            {"id": "D2", "query": "How long should adults sleep?", "category": "direct"}
        ],
        "edge_case_queries": []
    }"#;

    #[test]
    fn test_groups_keep_document_order() {
        let suite = QuerySuite::parse(SUITE).unwrap();

        let names: Vec<&str> = suite.groups().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["synthesis_queries", "direct_queries", "edge_case_queries"]);

        let ids: Vec<&str> = suite.queries().map(|q| q.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "D1", "D2"]);
        assert_eq!(suite.len(), 3);
        assert_eq!(suite.queries().nth(2).unwrap().phase1_task, None);
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(QuerySuite::parse("[1, 2]").is_err());
    }

    #[test]
    fn test_malformed_query_names_group() {
        let err = QuerySuite::parse(r#"{"direct_queries": [{"id": "D1"}]}"#).unwrap_err();
        assert!(format!("{:#}", err).contains("direct_queries"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = QuerySuite::load(&dir.path().join("queries.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to read query suite"));
    }
}
