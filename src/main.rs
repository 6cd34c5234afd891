//! Citation RAG CLI
//!
//! Ingests a corpus, builds the vector index and answers questions with
//! validated citations.

use anyhow::{Context, Result};
use citation_rag::{
    chunker::ingest_corpus,
    config::Config,
    embeddings,
    index::{METADATA_FILENAME, VECTORS_FILENAME, VectorIndex},
    llm::LlmClient,
    manifest::Manifest,
    persistence::{QueryLogger, load_chunks, save_chunks},
    pipeline::RagPipeline,
};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

/// Citation RAG - grounded answers over a research corpus
#[derive(Parser)]
#[command(name = "rag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk every .txt and .md file under a corpus directory
    Ingest {
        /// Directory holding the corpus text files
        corpus_dir: PathBuf,

        /// Output path for the chunk store (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Embed the chunk store and save the vector index
    BuildIndex {
        /// Chunk store to read (overrides config)
        #[arg(long)]
        chunks: Option<PathBuf>,

        /// Index directory to write (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Answer a question from the indexed corpus
    Query {
        /// The question
        query: String,

        /// Number of chunks to retrieve (defaults to config top_k)
        #[arg(short, long)]
        k: Option<usize>,

        /// Validate citations and print a reference list
        #[arg(long)]
        enhance: bool,

        /// Print the retrieved chunks as well
        #[arg(long)]
        show_chunks: bool,

        /// Do not append the result to the query log
        #[arg(long)]
        no_log: bool,
    },

    /// Show information about the index and manifest
    Info,

    /// Test LLM connection
    Test,
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
        Commands::Ingest { corpus_dir, output } => cmd_ingest(&config, corpus_dir, output),
        Commands::BuildIndex { chunks, output } => cmd_build_index(&config, chunks, output).await,
        Commands::Query {
            query,
            k,
            enhance,
            show_chunks,
            no_log,
        } => cmd_query(&config, query, k, enhance, show_chunks, no_log).await,
        Commands::Info => cmd_info(&config),
        Commands::Test => cmd_test(config).await,
    }
}

fn cmd_ingest(config: &Config, corpus_dir: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let output = output.unwrap_or_else(|| config.paths.chunks.clone());
    let chunking = &config.chunking;

    println!("Ingesting corpus: {}", corpus_dir.display());
    println!(
        "  Chunk size: {} tokens, overlap: {}",
        chunking.chunk_size, chunking.overlap
    );
    println!(
        "  Tokenizer:  {}",
        chunking.tokenizer.as_deref().unwrap_or("whitespace")
    );

    let start = Instant::now();
    let chunks = ingest_corpus(&corpus_dir, chunking).context("Failed to chunk corpus")?;
    let sources: BTreeSet<&str> = chunks.iter().map(|c| c.source_id.as_str()).collect();

    save_chunks(&output, &chunks).context("Failed to save chunks")?;

    println!("\nCorpus chunked:");
    println!("  Sources:  {}", sources.len());
    println!("  Chunks:   {}", chunks.len());
    println!("  Time:     {:.2?}", start.elapsed());
    println!("\nChunks saved to: {}", output.display());

    Ok(())
}

async fn cmd_build_index(
    config: &Config,
    chunks_path: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    let chunks_path = chunks_path.unwrap_or_else(|| config.paths.chunks.clone());
    let output = output.unwrap_or_else(|| config.paths.index_dir.clone());

    let chunks = load_chunks(&chunks_path).with_context(|| {
        format!(
            "Failed to load chunks from '{}'. Run 'ingest' first.",
            chunks_path.display()
        )
    })?;

    println!("Building index over {} chunks", chunks.len());
    println!("Embedding model: {}", config.embedding.model);

    let start = Instant::now();
    let embedder = embeddings::from_config(&config.embedding)?;
    let index = VectorIndex::build(chunks, embedder.as_ref(), config.embedding.batch_size)
        .await
        .context("Failed to build index")?;

    index.save(&output).context("Failed to save index")?;

    println!("\nIndex built:");
    println!("  Vectors:    {}", index.len());
    println!("  Dimension:  {}", index.dimension());
    println!("  Build time: {:.2?}", start.elapsed());
    println!("\nIndex saved to: {}", output.display());

    Ok(())
}

async fn cmd_query(
    config: &Config,
    query: String,
    k: Option<usize>,
    enhance: bool,
    show_chunks: bool,
    no_log: bool,
) -> Result<()> {
    config.validate().context("Invalid configuration")?;
    let k = k.unwrap_or(config.retrieval.top_k);

    let mut pipeline = RagPipeline::from_config(config).with_context(|| {
        format!(
            "Failed to load index from '{}'. Run 'build-index' first.",
            config.paths.index_dir.display()
        )
    })?;
    if !no_log {
        pipeline = pipeline.with_logger(QueryLogger::new(&config.paths.query_log));
    }

    println!("Query: \"{}\"", query);
    println!("Using model: {}", config.llm.model);
    println!();

    let start = Instant::now();
    let result = pipeline
        .query(&query, k, enhance)
        .await
        .context("Query failed")?;
    let duration = start.elapsed();

    if show_chunks {
        println!("Retrieved chunks:");
        println!("{}", "─".repeat(60));
        for (i, chunk) in result.retrieved_chunks.iter().enumerate() {
            println!(
                "{:>2}. ({}, {}) score {:.4}",
                i + 1,
                chunk.source_id,
                chunk.chunk_id,
                chunk.similarity_score.unwrap_or_default()
            );
            let preview: String = chunk.text.chars().take(200).collect();
            println!("    {}", preview.replace('\n', " "));
        }
        println!("{}", "─".repeat(60));
        println!();
    }

    println!("{}", result.answer);
    println!();

    if result.enhanced {
        println!("{}", "─".repeat(60));
        if result.citation_validation_passed {
            println!("Citations: {} (all valid)", result.citations.len());
        } else {
            println!(
                "Citations: {} ({} not in retrieved chunks)",
                result.citations.len(),
                result.invalid_citations.len()
            );
            for citation in &result.invalid_citations {
                println!("  invalid: {}", citation);
            }
        }
        if !result.reference_list.is_empty() {
            println!("\nReferences:\n{}", result.reference_list);
        }
    }

    println!("{}", "─".repeat(60));
    println!(
        "{} chunks, {} tokens, {:.2?}",
        result.metadata.num_chunks_retrieved, result.metadata.total_tokens, duration
    );

    Ok(())
}

fn cmd_info(config: &Config) -> Result<()> {
    let index_dir = &config.paths.index_dir;
    let index = VectorIndex::load(index_dir).with_context(|| {
        format!(
            "Index not found at '{}'. Run 'build-index' first.",
            index_dir.display()
        )
    })?;
    let sources: BTreeSet<&str> = index
        .entries()
        .iter()
        .map(|e| e.chunk.source_id.as_str())
        .collect();

    println!("Index Information");
    println!("{}", "─".repeat(40));
    println!("  Chunks:       {}", index.len());
    println!("  Sources:      {}", sources.len());
    println!("  Dimension:    {}", index.dimension());
    println!(
        "  Vectors:      {:.1} KB",
        file_size(&index_dir.join(VECTORS_FILENAME)) as f64 / 1024.0
    );
    println!(
        "  Metadata:     {:.1} KB",
        file_size(&index_dir.join(METADATA_FILENAME)) as f64 / 1024.0
    );
    println!("  Index path:   {}", index_dir.display());

    match Manifest::load(&config.paths.manifest) {
        Ok(manifest) => {
            let missing = sources.iter().filter(|s| manifest.get(s).is_none()).count();
            println!("  Manifest:     {} entries", manifest.len());
            if missing > 0 {
                println!("  Unlisted:     {} indexed sources", missing);
            }
        }
        Err(e) => println!("  Manifest:     unavailable ({})", e),
    }

    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

async fn cmd_test(config: Config) -> Result<()> {
    println!("Testing LLM connection...\n");

    println!("Configuration:");
    println!("  API Base:  {}", config.llm.api_base);
    println!("  Model:     {}", config.llm.model);
    println!(
        "  API Key:   {}...",
        config.llm.api_key.chars().take(8).collect::<String>()
    );
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(config.llm);

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => println!("Connection successful!"),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}
