//! Citation RAG - citation-grounded question answering over a research corpus.
//!
//! Documents are split into overlapping chunks, embedded into a dense index,
//! and retrieved per query. An LLM answers from the retrieved chunks only,
//! citing each claim as `(source_id, chunk_id)`. Enhanced mode validates those
//! citations against what was actually retrieved and renders a reference list
//! from the source manifest.
//!
//! # Quick Start
//!
//! ```no_run
//! use citation_rag::{config::Config, pipeline::RagPipeline};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     // Loads the saved index and manifest and connects the backends
//!     let pipeline = RagPipeline::from_config(&config)?;
//!
//!     let result = pipeline
//!         .query("How does sleep deprivation affect mood?", 5, true)
//!         .await?;
//!
//!     println!("{}", result.answer);
//!     println!("{}", result.reference_list);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Chunker**: fixed-size overlapping token windows with stable ids
//! - **VectorIndex**: unit-normalized vectors searched by inner product
//! - **Retriever**: embeds the query and returns the top-k chunks
//! - **Generator**: prompts the LLM with retries and backoff
//! - **CitationValidator**: checks citations and builds reference lists
//! - **eval**: batch runs, scoring, comparison and failure mining

pub mod chunker;
pub mod citations;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod eval;
pub mod generator;
pub mod index;
pub mod llm;
pub mod manifest;
pub mod persistence;
pub mod pipeline;
pub mod retriever;

// Re-export commonly used types
pub use chunker::{Chunk, Chunker};
pub use citations::{Citation, CitationValidator};
pub use config::Config;
pub use error::{RagError, Result};
pub use generator::Generator;
pub use index::VectorIndex;
pub use llm::LlmClient;
pub use manifest::Manifest;
pub use pipeline::{QueryResult, RagPipeline};
pub use retriever::Retriever;
