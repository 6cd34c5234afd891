//! Prompt templates for answer generation and answer judging.
//!
//! Templates use `{name}` placeholders filled by [`Prompts::fill`].

/// Collection of prompts used for generation and evaluation.
pub struct Prompts;

impl Prompts {
    /// Substitute `{name}` placeholders in one left-to-right pass.
    ///
    /// Inserted values are never rescanned, so text that itself contains a
    /// placeholder is passed through verbatim. Braces that do not name one
    /// of `values` are left as they are.
    pub fn fill(template: &str, values: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            let value = after.find('}').and_then(|close| {
                let name = &after[..close];
                values
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| (*value, close))
            });
            match value {
                Some((value, close)) => {
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                None => {
                    out.push('{');
                    rest = after;
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// System prompt for citation-constrained answering.
    pub fn answer_system() -> &'static str {
        r#"You are a research assistant specializing in evidence synthesis and academic citation practices.

CRITICAL CITATION RULES:
1. Base EVERY claim on the provided evidence chunks
2. Cite using format: (source_id, chunk_id)
3. If evidence is insufficient, state: "The provided evidence does not contain information about [topic]. To answer this question, additional sources covering [specific gap] would be needed."
4. NEVER fabricate or invent citations
5. NEVER add commentary beyond what is requested
6. Include statistics and quantitative findings when available in the evidence
7. Direct quotes must be verbatim from chunks

CONSTRAINTS:
- Only use information explicitly stated in evidence chunks
- If unsure, omit the claim rather than guess
- Uncertainty is acceptable - state it clearly
- Output should be structured and citation-dense"#
    }

    /// User prompt carrying the query and the tagged evidence chunks.
    pub fn answer_user() -> &'static str {
        r#"QUERY: {query}

EVIDENCE CHUNKS (cite using the IDs provided):
{chunks}

Provide a structured answer that:
1. Directly addresses the query
2. Cites every major claim using (source_id, chunk_id) format
3. Includes specific findings/statistics from the evidence
4. States explicitly if evidence is missing or insufficient

Answer:"#
    }

    /// System prompt for the answer judge.
    pub fn judge_system() -> &'static str {
        "You are an expert evaluator. Respond only with valid JSON."
    }

    /// Header of the judge prompt; the task rubric is appended after it.
    pub fn judge_header() -> &'static str {
        r#"You are an expert evaluator assessing the outputs of a retrieval-augmented research assistant.

QUERY: {query}
QUERY TYPE: {category} | Task: {task}

RETRIEVED EVIDENCE CHUNKS:
{chunks}

GENERATED ANSWER:
{answer}

"#
    }

    /// Footer of the judge prompt describing the expected JSON.
    pub fn judge_footer() -> &'static str {
        r#"
TASK: Evaluate the answer and provide scores for GROUNDEDNESS and ANSWER_RELEVANCE.

Respond in JSON format:
{
  "groundedness_score": <1-4 integer>,
  "answer_relevance": <1-4 integer>,
  "groundedness_reasoning": "<brief explanation>",
  "relevance_reasoning": "<brief explanation>"
}
"#
    }
}
