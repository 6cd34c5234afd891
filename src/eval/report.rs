//! The combined evaluation report and its console rendering.

use super::compare::{Comparison, EnhancedFeatures, Metric, MetricDelta};
use super::failures::FailureCase;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything `rag-eval compare` produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub generated_at: String,
    pub comparison: Comparison,
    pub enhanced_features: EnhancedFeatures,
    /// Failure cases found before selection.
    pub failure_candidates: usize,
    pub representative_failures: Vec<FailureCase>,
}

impl EvaluationReport {
    /// Save as pretty-printed JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(path, json).with_context(|| format!("Failed to write report: {:?}", path))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read report: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| "Failed to parse report JSON")
    }

    pub fn print_summary(&self) {
        println!("\n========== Baseline vs Enhanced ==========");
        for delta in &self.comparison.overall {
            print_delta(delta);
        }

        print_groups("By category", &self.comparison.by_category);
        print_groups("By task", &self.comparison.by_task);

        let features = &self.enhanced_features;
        println!("------------------------------------------");
        println!(
            "Citation validation passed: {}/{} ({:.1}%)",
            features.citation_validation_passed,
            features.total_queries,
            features.validation_pass_rate()
        );
        println!("Avg unique sources/query:   {:.1}", features.avg_unique_sources);
        println!(
            "Queries with reference list: {}/{}",
            features.queries_with_reference_list, features.total_queries
        );
        println!(
            "Queries with invalid citations: {}/{}",
            features.queries_with_invalid_citations, features.total_queries
        );

        println!("------------------------------------------");
        println!(
            "Failure cases: {} found, {} selected",
            self.failure_candidates,
            self.representative_failures.len()
        );
        for (i, failure) in self.representative_failures.iter().enumerate() {
            let query: String = failure.query.chars().take(70).collect();
            println!("\n{}. {}", i + 1, failure.failure_type);
            println!("   Query ID:   {}", failure.query_id);
            println!("   Query:      {}", query);
            println!("   Issue:      {}", failure.issue);
            println!("   Root cause: {}", failure.root_cause);
        }
        println!("==========================================\n");
    }
}

fn print_delta(delta: &MetricDelta) {
    println!(
        "{:<20} {:.3} -> {:.3}  ({:+.3}, {:+.1}%)",
        delta.metric.label(),
        delta.baseline_mean,
        delta.enhanced_mean,
        delta.absolute_delta,
        delta.percent_delta
    );
}

fn print_groups(title: &str, groups: &std::collections::BTreeMap<String, Vec<MetricDelta>>) {
    if groups.is_empty() {
        return;
    }
    println!("------------------------------------------");
    println!("{}:", title);
    for (name, deltas) in groups {
        let line: Vec<String> = deltas
            .iter()
            .filter(|d| d.metric != Metric::TotalCitations)
            .map(|d| {
                format!(
                    "{} {:.2} -> {:.2}",
                    d.metric.label(),
                    d.baseline_mean,
                    d.enhanced_mean
                )
            })
            .collect();
        println!("  {:<12} {}", name, line.join(" | "));
    }
}
