//! LLM-as-judge scoring of groundedness and answer relevance.

use crate::error::{RagError, Result};
use crate::llm::{CompletionBackend, Prompts};
use crate::pipeline::QueryResult;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Retrieved chunks shown to the judge.
const JUDGE_CONTEXT_CHUNKS: usize = 3;
/// Characters of each chunk shown to the judge.
const JUDGE_CHUNK_CHARS: usize = 300;

/// The kind of task a query exercises, which selects the judging rubric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    ClaimEvidenceExtraction,
    CrossSourceSynthesis,
    EdgeCase,
    General,
}

impl TaskKind {
    /// `CEE` and `CSS` task tags win; otherwise an `edge_case` category
    /// selects the edge-case rubric.
    pub fn from_tags(phase1_task: Option<&str>, category: Option<&str>) -> Self {
        match phase1_task {
            Some(t) if t.eq_ignore_ascii_case("cee") => TaskKind::ClaimEvidenceExtraction,
            Some(t) if t.eq_ignore_ascii_case("css") => TaskKind::CrossSourceSynthesis,
            _ if category == Some("edge_case") => TaskKind::EdgeCase,
            _ => TaskKind::General,
        }
    }

    pub fn rubric(self) -> &'static str {
        match self {
            TaskKind::ClaimEvidenceExtraction => CEE_RUBRIC,
            TaskKind::CrossSourceSynthesis => CSS_RUBRIC,
            TaskKind::EdgeCase => EDGE_CASE_RUBRIC,
            TaskKind::General => GENERAL_RUBRIC,
        }
    }
}

const CEE_RUBRIC: &str = r#"EVALUATION CRITERIA FOR CEE (Claim-Evidence-Extraction):

GROUNDEDNESS (1-4 scale):
- 4: All claims are explicitly stated in retrieved chunks with matching evidence; citations are correct and verifiable
- 3: Most claims grounded; minor paraphrasing acceptable; citations mostly correct
- 2: Some claims not clearly supported by chunks; vague or incorrect citations
- 1: Hallucinations present; fabricated claims or citations; evidence doesn't match chunks

ANSWER RELEVANCE (1-4 scale):
- 4: Answer extracts specific claims with direct evidence/quotes and proper citations in Claim-Evidence-Citation format
- 3: Answer extracts claims but may lack some direct quotes or have minor citation issues
- 2: Answer provides general information but doesn't follow CEE format; missing specific claims with evidence
- 1: Answer doesn't extract claims or provide evidence; doesn't address CEE requirements

Check if answer:
- Extracts specific claims (not just general statements)
- Provides direct evidence/quotes for each claim
- Includes proper citations in (source_id, chunk_id) format
- Follows Claim-Evidence-Citation structure
"#;

const CSS_RUBRIC: &str = r#"EVALUATION CRITERIA FOR CSS (Cross-Source Synthesis):

GROUNDEDNESS (1-4 scale):
- 4: All comparisons/agreements/disagreements are explicitly stated in retrieved chunks; citations correct
- 3: Most comparisons grounded; minor interpretation acceptable; citations mostly correct
- 2: Some comparisons not clearly supported; vague citations or missing evidence
- 1: Fabricated comparisons; citations don't support claims; evidence doesn't match chunks

ANSWER RELEVANCE (1-4 scale):
- 4: Answer identifies clear agreements and disagreements across sources with specific evidence and citations from each
- 3: Answer compares sources but may miss some agreements/disagreements or have incomplete citations
- 2: Answer mentions multiple sources but doesn't clearly synthesize agreements/disagreements
- 1: Answer doesn't compare sources or identify agreements/disagreements; doesn't address CSS requirements

Check if answer:
- Identifies areas of agreement between sources
- Identifies areas of disagreement or different emphasis
- Provides specific evidence from each source with citations
- Synthesizes findings across sources (not just lists them)
"#;

const EDGE_CASE_RUBRIC: &str = r#"EVALUATION CRITERIA FOR EDGE CASE QUERIES:

GROUNDEDNESS (1-4 scale):
- 4: Answer correctly identifies presence/absence of evidence; all claims about evidence are accurate
- 3: Answer mostly accurate about evidence availability; minor issues
- 2: Answer unclear about evidence availability; makes claims without proper checking
- 1: Answer fabricates evidence or incorrectly states evidence exists/doesn't exist

ANSWER RELEVANCE (1-4 scale):
- 4: Answer explicitly states whether evidence exists or not; if exists, provides it with citations; if not, clearly states absence
- 3: Answer addresses evidence availability but may be less explicit
- 2: Answer partially addresses query but doesn't clearly state evidence availability
- 1: Answer doesn't address whether evidence exists; provides unrelated information

Check if answer:
- Explicitly states "The provided evidence does not contain information about [topic]" if evidence is missing
- OR provides evidence with citations if evidence exists
- Doesn't fabricate evidence when none exists
- Clearly addresses the "does corpus contain evidence" aspect
"#;

const GENERAL_RUBRIC: &str = r#"EVALUATION CRITERIA FOR GENERAL QUERIES:

GROUNDEDNESS (1-4 scale):
- 4: All claims grounded in retrieved chunks; citations correct and verifiable
- 3: Most claims grounded; minor issues acceptable; citations mostly correct
- 2: Some claims unsupported; vague or incorrect citations
- 1: Hallucinations; fabricated citations; claims don't match chunks

ANSWER RELEVANCE (1-4 scale):
- 4: Directly and completely answers the query with specific findings and proper citations
- 3: Answers query well but may miss minor details; citations present
- 2: Partially answers query; key information missing; citations incomplete
- 1: Doesn't answer query; irrelevant or missing information

Check if answer:
- Directly addresses the query
- Includes specific findings/statistics when available
- Provides proper citations in (source_id, chunk_id) format
- Is comprehensive and relevant
"#;

/// Judge scores for one answer. Scores are `None` when judging failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub groundedness_score: Option<u8>,
    pub answer_relevance: Option<u8>,
    pub groundedness_reasoning: String,
    pub relevance_reasoning: String,
}

impl JudgeVerdict {
    /// Null scores with the error recorded as the groundedness reasoning.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            groundedness_reasoning: format!("Error: {}", error),
            ..Self::default()
        }
    }
}

/// Scores answers with a task-specific rubric.
pub struct LlmJudge {
    backend: Arc<dyn CompletionBackend>,
}

impl LlmJudge {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    /// Judge one result. Never fails: invocation and parse errors yield a
    /// verdict with null scores.
    pub async fn judge(&self, result: &QueryResult) -> JudgeVerdict {
        let prompt = Self::build_prompt(result);

        let outcome = match self
            .backend
            .complete(Some(Prompts::judge_system()), &prompt)
            .await
        {
            Ok(response) => Self::parse_verdict(&response.content),
            Err(e) => Err(e),
        };

        outcome.unwrap_or_else(|e| {
            warn!(
                query_id = result.query_id.as_deref().unwrap_or("unknown"),
                error = %e,
                "judge evaluation failed"
            );
            JudgeVerdict::failed(e)
        })
    }

    /// Full judge prompt: header, the task's rubric, then the answer format.
    pub fn build_prompt(result: &QueryResult) -> String {
        let task = TaskKind::from_tags(result.phase1_task.as_deref(), result.category.as_deref());

        let chunks = result
            .retrieved_chunks
            .iter()
            .take(JUDGE_CONTEXT_CHUNKS)
            .enumerate()
            .map(|(i, c)| {
                let excerpt: String = c.text.chars().take(JUDGE_CHUNK_CHARS).collect();
                format!("Chunk {} ({}): {}...", i + 1, c.chunk_id, excerpt)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let header = Prompts::fill(
            Prompts::judge_header(),
            &[
                ("query", &result.query),
                ("category", result.category.as_deref().unwrap_or("direct")),
                ("task", result.phase1_task.as_deref().unwrap_or("general")),
                ("chunks", &chunks),
                ("answer", &result.answer),
            ],
        );

        format!("{}{}{}", header, task.rubric(), Prompts::judge_footer())
    }

    /// Parse the judge's JSON reply, tolerating fenced code blocks.
    pub fn parse_verdict(response: &str) -> Result<JudgeVerdict> {
        #[derive(Deserialize)]
        struct RawVerdict {
            groundedness_score: f64,
            answer_relevance: f64,
            #[serde(default)]
            groundedness_reasoning: String,
            #[serde(default)]
            relevance_reasoning: String,
        }

        let json_str = extract_json(response);
        let raw: RawVerdict = serde_json::from_str(&json_str).map_err(|e| {
            RagError::LlmParse(format!(
                "Failed to parse judge response: {}. Response: {}",
                e, response
            ))
        })?;

        Ok(JudgeVerdict {
            groundedness_score: Some(clamp_score(raw.groundedness_score)),
            answer_relevance: Some(clamp_score(raw.answer_relevance)),
            groundedness_reasoning: raw.groundedness_reasoning,
            relevance_reasoning: raw.relevance_reasoning,
        })
    }
}

fn clamp_score(score: f64) -> u8 {
    score.round().clamp(1.0, 4.0) as u8
}

/// Pull a JSON object out of a model reply.
fn extract_json(response: &str) -> String {
    let response = response.trim();

    if let Some(start) = response.find("```json") {
        let body = &response[start + "```json".len()..];
        let end = body.find("```").unwrap_or(body.len());
        return body[..end].trim().to_string();
    }

    if let Some(start) = response.find("```") {
        let body = &response[start + 3..];
        // Only a bare language tag may follow the opening fence on its line.
        let line_end = body.find('\n').unwrap_or(body.len());
        let is_tag = body[..line_end]
            .trim()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        let body = if is_tag && line_end < body.len() {
            &body[line_end + 1..]
        } else if is_tag {
            ""
        } else {
            body
        };
        let end = body.find("```").unwrap_or(body.len());
        return body[..end].trim().to_string();
    }

    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if end > start {
            return response[start..=end].to_string();
        }
    }

    response.to_string()
}
