//! Per-query evaluation scores.

use super::judge::{JudgeVerdict, LlmJudge};
use crate::citations::{Citation, validate};
use crate::pipeline::QueryResult;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Citation counts for one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationPrecision {
    pub total: usize,
    pub valid: usize,
    pub invalid: Vec<Citation>,
    /// `valid / total`, or 0.0 when the answer has no citations.
    pub precision: f64,
}

/// Fraction of the answer's citations that point at retrieved chunks.
pub fn citation_precision(result: &QueryResult) -> CitationPrecision {
    let report = validate(&result.answer, &result.retrieved_chunks);
    let total = report.total();
    let precision = if total > 0 {
        report.valid.len() as f64 / total as f64
    } else {
        0.0
    };

    CitationPrecision {
        total,
        valid: report.valid.len(),
        invalid: report.invalid,
        precision,
    }
}

/// Scores for one evaluated query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalScore {
    #[serde(default)]
    pub query_id: String,
    #[serde(default = "unknown_category")]
    pub category: String,
    #[serde(default = "general_task")]
    pub phase1_task: String,
    #[serde(default)]
    pub query: String,
    pub citation_precision: f64,
    pub total_citations: usize,
    pub valid_citations: usize,
    #[serde(default)]
    pub invalid_citations: Vec<Citation>,
    pub groundedness_score: Option<u8>,
    pub answer_relevance: Option<u8>,
    #[serde(default)]
    pub groundedness_reasoning: String,
    #[serde(default)]
    pub relevance_reasoning: String,
}

fn unknown_category() -> String {
    "unknown".to_string()
}

fn general_task() -> String {
    "general".to_string()
}

/// Computes [`EvalScore`]s, optionally consulting an LLM judge.
#[derive(Default)]
pub struct EvaluationMetrics {
    judge: Option<LlmJudge>,
}

impl EvaluationMetrics {
    /// Without a judge, quality scores are left null with empty reasoning.
    pub fn new(judge: Option<LlmJudge>) -> Self {
        Self { judge }
    }

    pub async fn score(&self, result: &QueryResult) -> EvalScore {
        let citations = citation_precision(result);
        let verdict = match &self.judge {
            Some(judge) => judge.judge(result).await,
            None => JudgeVerdict::default(),
        };

        EvalScore {
            query_id: result.query_id.clone().unwrap_or_default(),
            category: result.category.clone().unwrap_or_else(unknown_category),
            phase1_task: result.phase1_task.clone().unwrap_or_else(general_task),
            query: result.query.clone(),
            citation_precision: citations.precision,
            total_citations: citations.total,
            valid_citations: citations.valid,
            invalid_citations: citations.invalid,
            groundedness_score: verdict.groundedness_score,
            answer_relevance: verdict.answer_relevance,
            groundedness_reasoning: verdict.groundedness_reasoning,
            relevance_reasoning: verdict.relevance_reasoning,
        }
    }

    /// Score every result in order. A judge failure on one result only
    /// nulls that result's quality scores.
    pub async fn score_all(&self, results: &[QueryResult]) -> Vec<EvalScore> {
        let mut scores = Vec::with_capacity(results.len());
        for (i, result) in results.iter().enumerate() {
            info!(
                current = i + 1,
                total = results.len(),
                query_id = result.query_id.as_deref().unwrap_or("unknown"),
                "scoring result"
            );
            scores.push(self.score(result).await);
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use crate::generator::tests::ScriptedBackend;
    use crate::pipeline::tests::sample_result;
    use crate::retriever::tests::chunk;
    use std::sync::Arc;

    #[test]
    fn test_precision_half() {
        let mut result = sample_result("A (src, src_chunk_001). B (src, src_chunk_026).");
        result.retrieved_chunks = vec![chunk("src", 1, "a")];

        let p = citation_precision(&result);
        assert_eq!(p.total, 2);
        assert_eq!(p.valid, 1);
        assert_eq!(p.invalid, vec![Citation::new("src", "src_chunk_026")]);
        assert!((p.precision - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_precision_without_citations_is_zero() {
        let mut result = sample_result("No citations at all.");
        result.retrieved_chunks = vec![chunk("src", 1, "a")];

        let p = citation_precision(&result);
        assert_eq!(p.total, 0);
        assert_eq!(p.precision, 0.0);
        assert!(!p.precision.is_nan());
    }

    #[tokio::test]
    async fn test_score_without_judge() {
        let mut result = sample_result("A (src, src_chunk_001).");
        result.retrieved_chunks = vec![chunk("src", 1, "a")];
        result.query_id = Some("D1".to_string());
        result.category = Some("direct".to_string());

        let score = EvaluationMetrics::default().score(&result).await;

        assert_eq!(score.query_id, "D1");
        assert_eq!(score.category, "direct");
        assert_eq!(score.phase1_task, "general");
        assert_eq!(score.citation_precision, 1.0);
        assert_eq!(score.groundedness_score, None);
        assert!(score.groundedness_reasoning.is_empty());
    }

    #[tokio::test]
    async fn test_score_all_isolates_judge_failures() {
        let backend = ScriptedBackend::new(vec![
            Err(RagError::LlmApi {
                status: 400,
                message: "bad request".to_string(),
            }),
            Ok(r#"{"groundedness_score": 4, "answer_relevance": 3}"#.to_string()),
        ]);
        let metrics = EvaluationMetrics::new(Some(LlmJudge::new(Arc::new(backend))));

        let mut first = sample_result("none");
        first.query_id = Some("Q1".to_string());
        let mut second = sample_result("none");
        second.query_id = Some("Q2".to_string());

        let scores = metrics.score_all(&[first, second]).await;

        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].groundedness_score, None);
        assert!(scores[0].groundedness_reasoning.starts_with("Error: "));
        assert_eq!(scores[0].citation_precision, 0.0);
        assert_eq!(scores[1].groundedness_score, Some(4));
        assert_eq!(scores[1].answer_relevance, Some(3));
    }

    #[test]
    fn test_eval_score_defaults_on_read() {
        let score: EvalScore = serde_json::from_str(
            r#"{"citation_precision": 0.5, "total_citations": 2, "valid_citations": 1,
                "groundedness_score": null, "answer_relevance": 2}"#,
        )
        .unwrap();
        assert_eq!(score.category, "unknown");
        assert_eq!(score.phase1_task, "general");
        assert_eq!(score.answer_relevance, Some(2));
    }
}
