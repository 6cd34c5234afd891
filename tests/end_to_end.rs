//! Corpus to report, through the public API, with in-process model stand-ins.

use async_trait::async_trait;
use citation_rag::chunker::{Chunker, chunk_corpus};
use citation_rag::config::ChunkConfig;
use citation_rag::embeddings::Embedder;
use citation_rag::eval::{
    ComparisonEngine, EvalRunner, EvalScore, EvaluationMetrics, FailureType, LlmJudge, Metric,
    QuerySuite, RunOptions,
};
use citation_rag::llm::{CompletionBackend, LlmResponse, Message, Prompts, RetryPolicy, TokenUsage};
use citation_rag::persistence::{QueryLogger, load_chunks, read_jsonl, save_chunks, write_jsonl};
use citation_rag::{
    CitationValidator, Generator, Manifest, QueryResult, RagPipeline, Result, Retriever,
    VectorIndex,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct KeywordEmbedder;

const KEYWORDS: [&str; 3] = ["sleep", "mood", "caffeine"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

/// Answers by query tag and plays the judge when given the judge system prompt.
struct ScriptedModel;

#[async_trait]
impl CompletionBackend for ScriptedModel {
    async fn chat(&self, messages: &[Message]) -> Result<LlmResponse> {
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let user = messages.last().map(|m| m.content.as_str()).unwrap_or("");

        let content = if system == Prompts::judge_system() {
            r#"```json
{"groundedness_score": 4, "answer_relevance": 3.6,
 "groundedness_reasoning": "supported", "relevance_reasoning": "on topic"}
```"#
                .to_string()
        } else if user.contains("Q-CAFF") {
            "Caffeine delays sleep onset (ohayon_2004, ohayon_2004_chunk_001) \
             and ruins mood (made_up, made_up_chunk_004)."
                .to_string()
        } else if user.contains("Q-MELA") {
            "The provided evidence does not contain information about melatonin.".to_string()
        } else {
            "Sleep loss worsens next-day mood (walker_2017, walker_2017_chunk_001).".to_string()
        };

        Ok(LlmResponse {
            content,
            finish_reason: Some("stop".to_string()),
            usage: Some(TokenUsage {
                prompt_tokens: 50,
                completion_tokens: 10,
                total_tokens: 60,
            }),
        })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

fn write_corpus(dir: &Path) {
    let corpus = dir.join("corpus");
    fs::create_dir_all(&corpus).unwrap();
    fs::write(
        corpus.join("walker_2017.txt"),
        "Sleep loss worsens mood and emotional regulation in healthy adults.",
    )
    .unwrap();
    fs::write(
        corpus.join("ohayon_2004.md"),
        "Caffeine taken late in the day delays sleep onset.",
    )
    .unwrap();
    fs::write(
        dir.join("manifest.json"),
        r#"[
            {"id": "walker_2017", "title": "Why We Sleep", "authors": "Walker, M.",
             "year": 2017, "venue": "Scribner", "link_or_DOI": "https://example.org/walker"},
            {"id": "ohayon_2004", "title": "Sleep Norms", "authors": "Ohayon, M. et al.",
             "year": "2004", "link_or_DOI": "10.1093/sleep/27.7.1255"}
        ]"#,
    )
    .unwrap();
    fs::write(
        dir.join("suite.json"),
        r#"{
            "description": "integration suite",
            "direct_queries": [
                {"id": "Q1", "query": "Q-MOOD how does sleep loss affect mood?", "category": "direct", "phase1_task": "CEE"},
                {"id": "Q2", "query": "Q-CAFF does caffeine affect sleep?", "category": "direct", "phase1_task": "CSS"}
            ],
            "edge_case_queries": [
                {"id": "E1", "query": "Q-MELA what about melatonin?", "category": "edge_case"}
            ]
        }"#,
    )
    .unwrap();
}

async fn build_pipeline(dir: &Path) -> RagPipeline {
    let chunker = Chunker::whitespace(ChunkConfig {
        chunk_size: 64,
        overlap: 8,
        ..Default::default()
    })
    .unwrap();
    let chunks = chunk_corpus(&dir.join("corpus"), &chunker).unwrap();
    save_chunks(&dir.join("chunks.jsonl"), &chunks).unwrap();

    let chunks = load_chunks(&dir.join("chunks.jsonl")).unwrap();
    let embedder: Arc<dyn Embedder> = Arc::new(KeywordEmbedder);
    let index = VectorIndex::build(chunks, embedder.as_ref(), 32).await.unwrap();
    index.save(&dir.join("index")).unwrap();

    let index = VectorIndex::load(&dir.join("index")).unwrap();
    let manifest = Manifest::load(&dir.join("manifest.json")).unwrap();

    RagPipeline::new(
        Retriever::new(embedder, index),
        Generator::new(Arc::new(ScriptedModel), RetryPolicy::none()),
    )
    .with_validator(CitationValidator::new(Arc::new(manifest)))
    .with_logger(QueryLogger::new(dir.join("logs/query_logs.jsonl")))
}

#[tokio::test]
async fn test_single_enhanced_query() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let pipeline = build_pipeline(dir.path()).await;

    let result = pipeline
        .query("Q-CAFF does caffeine affect sleep?", 2, true)
        .await
        .unwrap();

    assert_eq!(result.retrieved_chunks.len(), 2);
    assert_eq!(result.retrieved_chunks[0].chunk_id, "ohayon_2004_chunk_001");
    assert_eq!(result.citations.len(), 2);
    assert!(result.enhanced);
    assert!(!result.citation_validation_passed);
    assert_eq!(result.invalid_citations[0].source_id, "made_up");
    assert!(result.reference_list.contains("Sleep Norms"));
    assert!(!result.reference_list.contains("made_up"));
    assert_eq!(result.num_unique_sources, 2);
    assert_eq!(result.model, "scripted");

    let logged: Vec<serde_json::Value> =
        read_jsonl(&dir.path().join("logs/query_logs.jsonl")).unwrap();
    assert_eq!(logged.len(), 1);
    assert_eq!(
        logged[0]["citations_found"][0],
        "(ohayon_2004, ohayon_2004_chunk_001)"
    );
}

#[tokio::test]
async fn test_baseline_vs_enhanced_report() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let pipeline = build_pipeline(dir.path()).await;
    let suite = QuerySuite::load(&dir.path().join("suite.json")).unwrap();
    assert_eq!(suite.len(), 3);

    let baseline_path = dir.path().join("outputs/baseline_results.jsonl");
    let enhanced_path = dir.path().join("outputs/enhanced_results.jsonl");

    let options = RunOptions {
        k: 2,
        fresh: true,
        ..Default::default()
    };
    EvalRunner::new(&pipeline, options.clone())
        .run(&suite, &baseline_path)
        .await
        .unwrap();
    let summary = EvalRunner::new(
        &pipeline,
        RunOptions {
            enhance: true,
            ..options
        },
    )
    .run(&suite, &enhanced_path)
    .await
    .unwrap();
    assert_eq!(summary.by_category["direct"], 2);
    assert!(summary.enhanced);

    let baseline: Vec<QueryResult> = read_jsonl(&baseline_path).unwrap();
    let enhanced: Vec<QueryResult> = read_jsonl(&enhanced_path).unwrap();
    assert!(baseline.iter().all(|r| !r.enhanced));
    assert!(enhanced.iter().all(|r| r.enhanced));

    let metrics = EvaluationMetrics::new(Some(LlmJudge::new(Arc::new(ScriptedModel))));
    let baseline_scores = metrics.score_all(&baseline).await;
    let enhanced_scores = metrics.score_all(&enhanced).await;

    let scores_path = dir.path().join("outputs/enhanced_scores.jsonl");
    write_jsonl(&scores_path, &enhanced_scores).unwrap();
    let enhanced_scores: Vec<EvalScore> = read_jsonl(&scores_path).unwrap();

    let q2 = enhanced_scores.iter().find(|s| s.query_id == "Q2").unwrap();
    assert_eq!(q2.citation_precision, 0.5);
    assert_eq!(q2.groundedness_score, Some(4));
    assert_eq!(q2.answer_relevance, Some(4));
    assert_eq!(q2.phase1_task, "CSS");

    let e1 = enhanced_scores.iter().find(|s| s.query_id == "E1").unwrap();
    assert_eq!(e1.total_citations, 0);
    assert_eq!(e1.phase1_task, "general");

    let report = ComparisonEngine::default().report(&baseline_scores, &enhanced_scores, &enhanced);

    let precision = report
        .comparison
        .overall_delta(Metric::CitationPrecision)
        .unwrap();
    assert_eq!(precision.absolute_delta, 0.0);
    assert_eq!(report.comparison.by_category.len(), 2);
    assert_eq!(report.enhanced_features.total_queries, 3);
    assert_eq!(report.enhanced_features.citation_validation_passed, 2);
    assert_eq!(report.enhanced_features.queries_with_invalid_citations, 1);

    assert_eq!(report.failure_candidates, 2);
    let types: Vec<FailureType> = report
        .representative_failures
        .iter()
        .map(|f| f.failure_type)
        .collect();
    assert_eq!(
        types,
        vec![FailureType::LowCitationPrecision, FailureType::MissingCitations]
    );
    assert_eq!(report.representative_failures[0].query_id, "Q2");
    assert_eq!(report.representative_failures[1].query_id, "E1");

    let report_path = dir.path().join("outputs/eval_report.json");
    report.save(&report_path).unwrap();
    assert!(fs::read_to_string(&report_path).unwrap().contains("Low Citation Precision"));
}

#[test]
fn test_missing_index_is_reported() {
    let dir = TempDir::new().unwrap();
    let err = VectorIndex::load(&dir.path().join("nowhere")).unwrap_err();
    assert!(matches!(err, citation_rag::RagError::IndexNotFound(_)));

    let result = tokio_test::block_on(async {
        let chunker = Chunker::whitespace(ChunkConfig::default()).unwrap();
        chunk_corpus(&dir.path().join("nowhere"), &chunker)
    });
    assert!(matches!(result, Err(citation_rag::RagError::InvalidCorpusPath(_))));
}
