//! Language-model collaborator client.
//!
//! Talks to an Ollama-compatible HTTP endpoint: non-streaming chat for
//! query planning and summarization, streaming chat for the final synthesis
//! call (cancellable mid-stream), and an embeddings endpoint used by the
//! vector indexer. The model itself is a black box to the pipeline.

mod client;
mod types;

pub use client::LlmClient;
pub use types::{ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChatRole, ModelOptions};
