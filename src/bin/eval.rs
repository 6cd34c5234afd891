//! Evaluation CLI: batch runs, scoring and baseline vs enhanced comparison.
//!
//! Usage:
//!   rag-eval run --suite <path> --output <path> [--enhanced]
//!   rag-eval score <results> --output <path> [--no-llm]
//!   rag-eval compare --baseline <scores> --enhanced <scores> --results <results>

use anyhow::{Context, Result};
use citation_rag::config::Config;
use citation_rag::eval::{
    ComparisonEngine, EvalRunner, EvalScore, EvaluationMetrics, LlmJudge, QuerySuite, RunOptions,
};
use citation_rag::llm::LlmClient;
use citation_rag::persistence::{read_jsonl, write_jsonl};
use citation_rag::pipeline::{QueryResult, RagPipeline};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rag-eval")]
#[command(about = "Evaluate baseline vs citation-enhanced answering", long_about = None)]
struct Cli {
    /// Path to a YAML config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer every query in a suite and append results to a JSONL file
    Run {
        /// Query suite JSON file
        #[arg(long)]
        suite: PathBuf,

        /// Results JSONL file
        #[arg(short, long)]
        output: PathBuf,

        /// Validate citations and attach reference lists
        #[arg(long)]
        enhanced: bool,

        /// Truncate the output file before running
        #[arg(long)]
        fresh: bool,

        /// Keep going when a query fails
        #[arg(long)]
        continue_on_error: bool,

        /// Number of chunks to retrieve per query
        #[arg(short, long, default_value_t = 5)]
        k: usize,

        /// Where to write the run summary (defaults to <output>.summary.json)
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Score a results file
    Score {
        /// Results JSONL file produced by `run`
        results: PathBuf,

        /// Scores JSONL file
        #[arg(short, long)]
        output: PathBuf,

        /// Skip the LLM judge (citation precision only)
        #[arg(long)]
        no_llm: bool,
    },

    /// Compare baseline and enhanced scores and mine failure cases
    Compare {
        /// Baseline scores JSONL
        #[arg(long)]
        baseline: PathBuf,

        /// Enhanced scores JSONL
        #[arg(long)]
        enhanced: PathBuf,

        /// Enhanced results JSONL, used for failure details
        #[arg(long)]
        results: PathBuf,

        /// Report JSON file
        #[arg(short, long, default_value = "outputs/eval_report.json")]
        output: PathBuf,

        /// Number of representative failure cases to select
        #[arg(long, default_value_t = 3)]
        failures: usize,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config =
        Config::load_with_file(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Run {
            suite,
            output,
            enhanced,
            fresh,
            continue_on_error,
            k,
            summary,
        } => {
            let options = RunOptions {
                k,
                enhance: enhanced,
                fresh,
                continue_on_error,
            };
            cmd_run(&config, suite, output, options, summary).await
        }
        Commands::Score {
            results,
            output,
            no_llm,
        } => cmd_score(&config, results, output, no_llm).await,
        Commands::Compare {
            baseline,
            enhanced,
            results,
            output,
            failures,
        } => cmd_compare(baseline, enhanced, results, output, failures),
    }
}

async fn cmd_run(
    config: &Config,
    suite_path: PathBuf,
    output: PathBuf,
    options: RunOptions,
    summary_path: Option<PathBuf>,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let suite = QuerySuite::load(&suite_path)?;
    println!("Suite: {} ({} queries)", suite_path.display(), suite.len());
    for (name, items) in suite.groups() {
        println!("  {:<24} {}", name, items.len());
    }
    println!(
        "Mode: {}",
        if options.enhance { "enhanced" } else { "baseline" }
    );
    println!("LLM Model: {}", config.llm.model);

    let pipeline = RagPipeline::from_config(config).context("Failed to load pipeline")?;

    let start = Instant::now();
    let summary = EvalRunner::new(&pipeline, options)
        .run(&suite, &output)
        .await
        .context("Evaluation run failed")?;

    let summary_path = summary_path.unwrap_or_else(|| output.with_extension("summary.json"));
    summary
        .save(&summary_path)
        .context("Failed to save run summary")?;

    println!("\nRun complete in {:.2?}", start.elapsed());
    println!("  Queries:  {}", summary.total_queries);
    for (category, count) in &summary.by_category {
        println!("  {:<10} {}", category, count);
    }
    if !summary.failed.is_empty() {
        println!("  Failed:   {}", summary.failed.join(", "));
    }
    println!("Results appended to: {}", output.display());
    println!("Summary saved to: {}", summary_path.display());

    Ok(())
}

async fn cmd_score(
    config: &Config,
    results_path: PathBuf,
    output: PathBuf,
    no_llm: bool,
) -> Result<()> {
    let results: Vec<QueryResult> = read_jsonl(&results_path)
        .with_context(|| format!("Failed to read results: {:?}", results_path))?;
    println!("Scoring {} results from {}", results.len(), results_path.display());

    let judge = if no_llm {
        println!("LLM judge disabled; quality scores will be empty");
        None
    } else {
        config.validate().context("Invalid configuration")?;
        println!("Judge model: {}", config.llm.model);
        Some(LlmJudge::new(Arc::new(LlmClient::new(config.llm.clone()))))
    };

    let start = Instant::now();
    let scores = EvaluationMetrics::new(judge).score_all(&results).await;
    write_jsonl(&output, &scores).context("Failed to write scores")?;

    let judged = scores
        .iter()
        .filter(|s| s.groundedness_score.is_some())
        .count();
    println!("\nScored {} results in {:.2?}", scores.len(), start.elapsed());
    println!("  Judged:   {}/{}", judged, scores.len());
    println!("Scores saved to: {}", output.display());

    Ok(())
}

fn cmd_compare(
    baseline_path: PathBuf,
    enhanced_path: PathBuf,
    results_path: PathBuf,
    output: PathBuf,
    failure_limit: usize,
) -> Result<()> {
    let baseline: Vec<EvalScore> = read_jsonl(&baseline_path)
        .with_context(|| format!("Failed to read baseline scores: {:?}", baseline_path))?;
    let enhanced: Vec<EvalScore> = read_jsonl(&enhanced_path)
        .with_context(|| format!("Failed to read enhanced scores: {:?}", enhanced_path))?;
    let results: Vec<QueryResult> = read_jsonl(&results_path)
        .with_context(|| format!("Failed to read enhanced results: {:?}", results_path))?;

    println!(
        "Comparing {} baseline vs {} enhanced scores",
        baseline.len(),
        enhanced.len()
    );

    let report = ComparisonEngine::new(failure_limit).report(&baseline, &enhanced, &results);
    report.print_summary();

    report.save(&output)?;
    println!("Report saved to: {}", output.display());

    Ok(())
}
