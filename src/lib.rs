//! # Equity Research Agent
//!
//! A local, offline-capable research assistant that answers natural-language
//! questions about equities by combining a structured fact store, a semantic
//! vector store, and iterative web research, then streaming a synthesized,
//! citation-grounded report.
//!
//! ## Architecture
//!
//! ```text
//! request → Pipeline Controller
//!             ├── Intent Planner      (catalog resolution, classification)
//!             ├── Retrieval Orchestrator
//!             │     ├── Structured Store  (SQLite facts, TTL-aware)
//!             │     ├── Vector Store      (embedded chunks, cosine top-K)
//!             │     └── Web Research      (search → fetch → summarize)
//!             └── Report Synthesizer  (streamed, evidence-grounded)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use equity_research_agent::config::Config;
//! use equity_research_agent::pipeline::{PipelineController, ReportEvent, ResearchRequest};
//! use equity_research_agent::store::{NullAnalytics, SqliteStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = SqliteStore::new(&config.database).await?;
//!     let controller = Arc::new(PipelineController::from_config(
//!         &config,
//!         store,
//!         Arc::new(NullAnalytics),
//!     )?);
//!
//!     let mut stream = controller.run_research(ResearchRequest::new("7203のPERとROEは？"));
//!     while let Some(event) = stream.next().await {
//!         if let ReportEvent::Delta(text) = event {
//!             print!("{}", text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

/// Configuration loaded from environment variables.
pub mod config;
/// Error types and result aliases.
pub mod error;
/// Language-model collaborator client (chat, streaming, embeddings).
pub mod llm;
/// The research pipeline: planner, orchestrator, synthesizer, controller.
pub mod pipeline;
/// System prompts for the language-model collaborator.
pub mod prompts;
/// Structured fact store and instrument catalog.
pub mod store;
/// Vector store: embedded chunks with similarity search, plus the indexer.
pub mod vector;
/// Web research: search, fetch/extract, and the research sub-agent.
pub mod web;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use pipeline::{PipelineController, ReportEvent, ReportStream, ResearchRequest};
