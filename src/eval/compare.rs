//! Baseline versus enhanced run comparison.

use super::failures::{DEFAULT_FAILURE_LIMIT, MinedFailures, mine_failures};
use super::metrics::EvalScore;
use super::report::EvaluationReport;
use crate::pipeline::QueryResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A per-query metric averaged across a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CitationPrecision,
    Groundedness,
    AnswerRelevance,
    TotalCitations,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::CitationPrecision,
        Metric::Groundedness,
        Metric::AnswerRelevance,
        Metric::TotalCitations,
    ];

    /// The metric's value for one query; `None` when the judge gave no score.
    pub fn value(self, score: &EvalScore) -> Option<f64> {
        match self {
            Metric::CitationPrecision => Some(score.citation_precision),
            Metric::Groundedness => score.groundedness_score.map(f64::from),
            Metric::AnswerRelevance => score.answer_relevance.map(f64::from),
            Metric::TotalCitations => Some(score.total_citations as f64),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Metric::CitationPrecision => "citation precision",
            Metric::Groundedness => "groundedness",
            Metric::AnswerRelevance => "answer relevance",
            Metric::TotalCitations => "total citations",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Mean of the metric over the scores that have it; 0.0 if none do.
pub fn mean<'a>(metric: Metric, scores: impl IntoIterator<Item = &'a EvalScore>) -> f64 {
    let (sum, count) = scores
        .into_iter()
        .filter_map(|s| metric.value(s))
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

/// Change in one metric between two runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDelta {
    pub metric: Metric,
    pub baseline_mean: f64,
    pub enhanced_mean: f64,
    pub absolute_delta: f64,
    /// Relative change in percent; 0 when the baseline mean is not positive.
    pub percent_delta: f64,
}

impl MetricDelta {
    pub fn new(metric: Metric, baseline_mean: f64, enhanced_mean: f64) -> Self {
        let absolute_delta = enhanced_mean - baseline_mean;
        let percent_delta = if baseline_mean > 0.0 {
            absolute_delta / baseline_mean * 100.0
        } else {
            0.0
        };
        Self {
            metric,
            baseline_mean,
            enhanced_mean,
            absolute_delta,
            percent_delta,
        }
    }
}

fn deltas<'a>(
    baseline: impl Iterator<Item = &'a EvalScore> + Clone,
    enhanced: impl Iterator<Item = &'a EvalScore> + Clone,
) -> Vec<MetricDelta> {
    Metric::ALL
        .iter()
        .map(|&metric| {
            MetricDelta::new(
                metric,
                mean(metric, baseline.clone()),
                mean(metric, enhanced.clone()),
            )
        })
        .collect()
}

fn grouped<'a>(
    baseline: &'a [EvalScore],
    enhanced: &'a [EvalScore],
    key: fn(&EvalScore) -> &str,
) -> BTreeMap<String, Vec<MetricDelta>> {
    let keys: BTreeSet<&str> = baseline.iter().chain(enhanced).map(key).collect();
    keys.into_iter()
        .map(|k| {
            let in_group = move |s: &&EvalScore| key(*s) == k;
            (
                k.to_string(),
                deltas(baseline.iter().filter(in_group), enhanced.iter().filter(in_group)),
            )
        })
        .collect()
}

fn category_key(score: &EvalScore) -> &str {
    &score.category
}

fn task_key(score: &EvalScore) -> &str {
    &score.phase1_task
}

/// Overall and per-group deltas between two scored runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub overall: Vec<MetricDelta>,
    pub by_category: BTreeMap<String, Vec<MetricDelta>>,
    pub by_task: BTreeMap<String, Vec<MetricDelta>>,
}

impl Comparison {
    pub fn overall_delta(&self, metric: Metric) -> Option<&MetricDelta> {
        self.overall.iter().find(|d| d.metric == metric)
    }
}

/// Statistics only the enhanced run has.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedFeatures {
    pub total_queries: usize,
    pub citation_validation_passed: usize,
    pub avg_unique_sources: f64,
    pub queries_with_reference_list: usize,
    pub queries_with_invalid_citations: usize,
}

impl EnhancedFeatures {
    pub fn from_results(results: &[QueryResult]) -> Self {
        let total = results.len();
        let total_sources: usize = results.iter().map(|r| r.num_unique_sources).sum();
        Self {
            total_queries: total,
            citation_validation_passed: results
                .iter()
                .filter(|r| r.citation_validation_passed)
                .count(),
            avg_unique_sources: if total == 0 {
                0.0
            } else {
                total_sources as f64 / total as f64
            },
            queries_with_reference_list: results
                .iter()
                .filter(|r| !r.reference_list.is_empty())
                .count(),
            queries_with_invalid_citations: results
                .iter()
                .filter(|r| !r.invalid_citations.is_empty())
                .count(),
        }
    }

    /// Share of queries whose citations all validated, in percent.
    pub fn validation_pass_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.citation_validation_passed as f64 / self.total_queries as f64 * 100.0
        }
    }
}

/// Compares scored runs and mines the enhanced run for failures.
#[derive(Debug, Clone)]
pub struct ComparisonEngine {
    /// Representative failure cases to select.
    pub failure_limit: usize,
}

impl Default for ComparisonEngine {
    fn default() -> Self {
        Self {
            failure_limit: DEFAULT_FAILURE_LIMIT,
        }
    }
}

impl ComparisonEngine {
    pub fn new(failure_limit: usize) -> Self {
        Self { failure_limit }
    }

    /// Per-metric deltas overall, by category and by task tag. Groups present
    /// in only one run compare against a mean of 0.
    pub fn compare(&self, baseline: &[EvalScore], enhanced: &[EvalScore]) -> Comparison {
        Comparison {
            overall: deltas(baseline.iter(), enhanced.iter()),
            by_category: grouped(baseline, enhanced, category_key),
            by_task: grouped(baseline, enhanced, task_key),
        }
    }

    pub fn mine_failures(&self, scores: &[EvalScore], results: &[QueryResult]) -> MinedFailures {
        mine_failures(scores, results, self.failure_limit)
    }

    /// Comparison, enhanced-run statistics and failure cases in one report.
    pub fn report(
        &self,
        baseline_scores: &[EvalScore],
        enhanced_scores: &[EvalScore],
        enhanced_results: &[QueryResult],
    ) -> EvaluationReport {
        let comparison = self.compare(baseline_scores, enhanced_scores);
        let failures = self.mine_failures(enhanced_scores, enhanced_results);

        EvaluationReport {
            generated_at: chrono::Local::now().to_rfc3339(),
            comparison,
            enhanced_features: EnhancedFeatures::from_results(enhanced_results),
            failure_candidates: failures.candidates.len(),
            representative_failures: failures.selected,
        }
    }
}
