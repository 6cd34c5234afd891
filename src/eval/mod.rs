//! Evaluation tooling for the query pipeline.
//!
//! This module provides:
//! - Query suite loading and a batch runner that records every answer
//! - Citation precision plus LLM-as-judge groundedness and relevance scores
//! - Baseline vs enhanced comparison with failure-case mining

pub mod compare;
pub mod failures;
pub mod judge;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod suite;

pub use compare::{Comparison, ComparisonEngine, EnhancedFeatures, Metric, MetricDelta};
pub use failures::{FailureCase, FailureType, MinedFailures, mine_failures};
pub use judge::{JudgeVerdict, LlmJudge, TaskKind};
pub use metrics::{CitationPrecision, EvalScore, EvaluationMetrics, citation_precision};
pub use report::EvaluationReport;
pub use runner::{EvalRunner, RunOptions, RunSummary};
pub use suite::{QueryItem, QuerySuite};
