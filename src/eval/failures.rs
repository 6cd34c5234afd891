//! Failure-case mining over an evaluation run.
//!
//! Every query is tested against five rules in a fixed order and assigned to
//! the first that matches. A handful of cases is then picked for manual
//! review: one per failure type first, then the most severe leftovers.

use super::metrics::EvalScore;
use crate::citations::Citation;
use crate::pipeline::QueryResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Citation precision below this is a failure.
pub const PRECISION_THRESHOLD: f64 = 0.8;
/// Judge scores below this are failures.
pub const SCORE_THRESHOLD: u8 = 3;
/// Cases selected for a report by default.
pub const DEFAULT_FAILURE_LIMIT: usize = 3;

/// Why a query counts as a failure, in rule order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureType {
    #[serde(rename = "Low Citation Precision")]
    LowCitationPrecision,
    #[serde(rename = "Missing Citations")]
    MissingCitations,
    #[serde(rename = "Low Groundedness")]
    LowGroundedness,
    #[serde(rename = "Low Answer Relevance")]
    LowAnswerRelevance,
    #[serde(rename = "Invalid Citations")]
    InvalidCitations,
}

impl FailureType {
    pub fn label(self) -> &'static str {
        match self {
            FailureType::LowCitationPrecision => "Low Citation Precision",
            FailureType::MissingCitations => "Missing Citations",
            FailureType::LowGroundedness => "Low Groundedness",
            FailureType::LowAnswerRelevance => "Low Answer Relevance",
            FailureType::InvalidCitations => "Invalid Citations",
        }
    }

    pub fn root_cause(self) -> &'static str {
        match self {
            FailureType::LowCitationPrecision => "Citations in answer do not match retrieved chunks",
            FailureType::MissingCitations => {
                "Answer generated without citations despite having retrieved chunks"
            }
            FailureType::LowGroundedness => {
                "Answer claims may not be fully supported by retrieved chunks"
            }
            FailureType::LowAnswerRelevance => "Answer does not adequately address the query",
            FailureType::InvalidCitations => "Citations reference chunks not in retrieved set",
        }
    }
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The metrics recorded with a case. Which fields are set depends on the
/// failure type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation_precision: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_citations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_citations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groundedness_score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_relevance: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invalid_citations: Vec<Citation>,
}

impl FailureMetrics {
    /// Sort key, most severe first. Absent values take lenient defaults
    /// (precision 1, scores 5) so they never dominate the ordering.
    fn severity(&self) -> (f64, u8, u8) {
        (
            self.citation_precision.unwrap_or(1.0),
            self.groundedness_score.unwrap_or(5),
            self.answer_relevance.unwrap_or(5),
        )
    }
}

fn by_severity(a: &FailureCase, b: &FailureCase) -> Ordering {
    let (ap, ag, ar) = a.metrics.severity();
    let (bp, bg, br) = b.metrics.severity();
    ap.total_cmp(&bp).then(ag.cmp(&bg)).then(ar.cmp(&br))
}

/// A classified failure with enough context to review it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCase {
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    pub query_id: String,
    pub category: String,
    pub phase1_task: String,
    pub query: String,
    pub issue: String,
    pub root_cause: String,
    pub metrics: FailureMetrics,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub retrieved_chunk_ids: Vec<String>,
    #[serde(default)]
    pub invalid_citations: Vec<Citation>,
    #[serde(default)]
    pub reference_list: String,
    #[serde(default)]
    pub citation_validation_passed: bool,
    #[serde(default)]
    pub num_unique_sources: usize,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
}

impl FailureCase {
    fn new(
        failure_type: FailureType,
        score: Option<&EvalScore>,
        result: Option<&QueryResult>,
        issue: String,
        metrics: FailureMetrics,
    ) -> Self {
        let text = |from_score: Option<&String>, from_result: Option<&String>, default: &str| {
            from_score
                .or(from_result)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            failure_type,
            query_id: text(
                score.map(|s| &s.query_id),
                result.and_then(|r| r.query_id.as_ref()),
                "",
            ),
            category: text(
                score.map(|s| &s.category),
                result.and_then(|r| r.category.as_ref()),
                "unknown",
            ),
            phase1_task: text(
                score.map(|s| &s.phase1_task),
                result.and_then(|r| r.phase1_task.as_ref()),
                "general",
            ),
            query: text(score.map(|s| &s.query), result.map(|r| &r.query), ""),
            issue,
            root_cause: failure_type.root_cause().to_string(),
            metrics,
            answer: result.map(|r| r.answer.clone()).unwrap_or_default(),
            retrieved_chunk_ids: result
                .map(|r| r.retrieved_chunks.iter().map(|c| c.chunk_id.clone()).collect())
                .unwrap_or_default(),
            invalid_citations: result.map(|r| r.invalid_citations.clone()).unwrap_or_default(),
            reference_list: result.map(|r| r.reference_list.clone()).unwrap_or_default(),
            citation_validation_passed: result.is_some_and(|r| r.citation_validation_passed),
            num_unique_sources: result.map(|r| r.num_unique_sources).unwrap_or_default(),
            reasoning: match (failure_type, score) {
                (FailureType::LowGroundedness, Some(s)) => s.groundedness_reasoning.clone(),
                (FailureType::LowAnswerRelevance, Some(s)) => s.relevance_reasoning.clone(),
                _ => String::new(),
            },
        }
    }
}

fn joined(citations: &[Citation]) -> String {
    citations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Run one score rule over every unclassified query, in score order.
fn apply_rule(
    scores: &[EvalScore],
    results_by_id: &HashMap<&str, &QueryResult>,
    classified: &mut HashSet<String>,
    failures: &mut Vec<FailureCase>,
    rule: &dyn Fn(&EvalScore, Option<&QueryResult>) -> Option<FailureCase>,
) {
    for score in scores {
        if classified.contains(&score.query_id) {
            continue;
        }
        let result = results_by_id.get(score.query_id.as_str()).copied();
        if let Some(case) = rule(score, result) {
            classified.insert(score.query_id.clone());
            failures.push(case);
        }
    }
}

/// Classify every failing query of the enhanced run.
///
/// Rules run one after another over the whole run: the four score rules in
/// score order, then the invalid-citation rule in result order. A query
/// already classified is skipped by later rules. Low citation precision
/// only applies to answers that cite something; an answer with no citations
/// at all is a "Missing Citations" case instead. When a query id occurs
/// more than once, its first record is the one consulted.
pub fn classify_failures(scores: &[EvalScore], results: &[QueryResult]) -> Vec<FailureCase> {
    let mut results_by_id: HashMap<&str, &QueryResult> = HashMap::new();
    for result in results {
        if let Some(id) = result.query_id.as_deref() {
            results_by_id.entry(id).or_insert(result);
        }
    }
    let mut scores_by_id: HashMap<&str, &EvalScore> = HashMap::new();
    for score in scores {
        scores_by_id.entry(score.query_id.as_str()).or_insert(score);
    }

    let mut classified: HashSet<String> = HashSet::new();
    let mut failures = Vec::new();
    let mut run_rule = |rule: &dyn Fn(&EvalScore, Option<&QueryResult>) -> Option<FailureCase>| {
        apply_rule(scores, &results_by_id, &mut classified, &mut failures, rule)
    };

    run_rule(&|score, result| {
        (score.total_citations > 0 && score.citation_precision < PRECISION_THRESHOLD).then(|| {
            FailureCase::new(
                FailureType::LowCitationPrecision,
                Some(score),
                result,
                format!(
                    "Citation precision: {:.2} - {}",
                    score.citation_precision,
                    joined(&score.invalid_citations)
                ),
                FailureMetrics {
                    citation_precision: Some(score.citation_precision),
                    total_citations: Some(score.total_citations),
                    valid_citations: Some(score.valid_citations),
                    ..Default::default()
                },
            )
        })
    });

    run_rule(&|score, result| {
        let retrieved = result.map_or(0, |r| r.retrieved_chunks.len());
        (score.total_citations == 0 && retrieved > 0).then(|| {
            FailureCase::new(
                FailureType::MissingCitations,
                Some(score),
                result,
                format!(
                    "No citations in answer despite {} retrieved chunks",
                    retrieved
                ),
                FailureMetrics {
                    citation_precision: Some(0.0),
                    total_citations: Some(0),
                    groundedness_score: score.groundedness_score,
                    answer_relevance: score.answer_relevance,
                    ..Default::default()
                },
            )
        })
    });

    run_rule(&|score, result| {
        let groundedness = score.groundedness_score.filter(|g| *g < SCORE_THRESHOLD)?;
        Some(FailureCase::new(
            FailureType::LowGroundedness,
            Some(score),
            result,
            format!("Groundedness score: {}/4 (below average)", groundedness),
            FailureMetrics {
                citation_precision: Some(score.citation_precision),
                groundedness_score: score.groundedness_score,
                answer_relevance: score.answer_relevance,
                ..Default::default()
            },
        ))
    });

    run_rule(&|score, result| {
        let relevance = score.answer_relevance.filter(|r| *r < SCORE_THRESHOLD)?;
        Some(FailureCase::new(
            FailureType::LowAnswerRelevance,
            Some(score),
            result,
            format!("Answer relevance: {}/4 (below average)", relevance),
            FailureMetrics {
                citation_precision: Some(score.citation_precision),
                groundedness_score: score.groundedness_score,
                answer_relevance: score.answer_relevance,
                ..Default::default()
            },
        ))
    });

    for result in results {
        let query_id = result.query_id.clone().unwrap_or_default();
        if result.invalid_citations.is_empty() || classified.contains(&query_id) {
            continue;
        }
        let score = scores_by_id.get(query_id.as_str()).copied();
        failures.push(FailureCase::new(
            FailureType::InvalidCitations,
            score,
            Some(result),
            format!(
                "Citation validation failed: {} invalid citations",
                result.invalid_citations.len()
            ),
            FailureMetrics {
                citation_precision: Some(score.map_or(0.0, |s| s.citation_precision)),
                total_citations: Some(score.map_or(0, |s| s.total_citations)),
                invalid_citations: result.invalid_citations.clone(),
                ..Default::default()
            },
        ));
        classified.insert(query_id);
    }

    failures
}

/// Pick up to `limit` cases: the first case of each type in encounter
/// order, then the most severe remaining cases.
pub fn select_representative(failures: &[FailureCase], limit: usize) -> Vec<FailureCase> {
    let mut selected: Vec<FailureCase> = Vec::with_capacity(limit);
    let mut seen_types = HashSet::new();

    for failure in failures {
        if selected.len() >= limit {
            break;
        }
        if seen_types.insert(failure.failure_type) {
            selected.push(failure.clone());
        }
    }

    if selected.len() < limit {
        let chosen: HashSet<&str> = selected.iter().map(|f| f.query_id.as_str()).collect();
        let mut remaining: Vec<&FailureCase> = failures
            .iter()
            .filter(|f| !chosen.contains(f.query_id.as_str()))
            .collect();
        remaining.sort_by(|a, b| by_severity(a, b));

        let needed = limit - selected.len();
        let extra: Vec<FailureCase> = remaining.into_iter().take(needed).cloned().collect();
        selected.extend(extra);
    }

    selected
}

/// Failure cases of a run and the representative sample drawn from them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MinedFailures {
    pub candidates: Vec<FailureCase>,
    pub selected: Vec<FailureCase>,
}

pub fn mine_failures(scores: &[EvalScore], results: &[QueryResult], limit: usize) -> MinedFailures {
    let candidates = classify_failures(scores, results);
    let selected = select_representative(&candidates, limit);
    MinedFailures {
        candidates,
        selected,
    }
}
