use std::sync::Arc;

use tracing::{debug, warn};

use super::{DocType, IndexedDocument, VectorStore};
use crate::error::{AppError, AppResult};
use crate::llm::LlmClient;

/// Paragraph-bounded chunk size ceiling, in characters.
const MAX_CHUNK_CHARS: usize = 1_500;

/// Converts raw text into vector-store entries.
///
/// Invoked by ingestion (the CLI `index` command) and asynchronously by the
/// retrieval orchestrator whenever web research produces a usable snippet,
/// so future requests can answer from the local store.
#[derive(Clone)]
pub struct EmbeddingIndexer {
    llm: LlmClient,
    store: Arc<dyn VectorStore>,
}

impl EmbeddingIndexer {
    /// Create a new indexer over an embedding client and vector store.
    pub fn new(llm: LlmClient, store: Arc<dyn VectorStore>) -> Self {
        Self { llm, store }
    }

    /// Chunk, embed, and upsert a piece of text. Returns the number of
    /// chunks indexed. Individual chunk failures are logged and skipped;
    /// the call fails only when nothing could be indexed at all.
    pub async fn index_text(
        &self,
        ticker: Option<&str>,
        doc_type: DocType,
        source: &str,
        text: &str,
    ) -> AppResult<usize> {
        let chunks = chunk_text(text, MAX_CHUNK_CHARS);
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut indexed = 0;
        let mut last_error: Option<AppError> = None;

        for chunk in &chunks {
            match self.llm.embed(chunk).await {
                Ok(embedding) => {
                    let doc = IndexedDocument::new(
                        ticker.map(|t| t.to_string()),
                        doc_type,
                        chunk.clone(),
                        source,
                        embedding,
                    );
                    match self.store.upsert_document(&doc).await {
                        Ok(()) => indexed += 1,
                        Err(e) => {
                            warn!(source, error = %e, "Failed to store document chunk");
                            last_error = Some(e.into());
                        }
                    }
                }
                Err(e) => {
                    warn!(source, error = %e, "Failed to embed chunk");
                    last_error = Some(e.into());
                }
            }
        }

        debug!(source, chunks = chunks.len(), indexed, "Indexed text");

        if indexed == 0 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(indexed)
    }
}

/// Split text into paragraph-bounded chunks no longer than `max_chars`.
///
/// Paragraphs are packed greedily; a single oversized paragraph is split
/// hard at the character boundary.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if paragraph.len() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            let mut rest = paragraph;
            while rest.len() > max_chars {
                // Split on a char boundary at or below the limit.
                let mut cut = max_chars;
                while !rest.is_char_boundary(cut) {
                    cut -= 1;
                }
                chunks.push(rest[..cut].to_string());
                rest = &rest[cut..];
            }
            if !rest.is_empty() {
                current.push_str(rest);
            }
            continue;
        }

        if current.len() + paragraph.len() + 2 > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_empty_text() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("\n\n\n\n", 100).is_empty());
    }

    #[test]
    fn test_chunk_single_paragraph() {
        let chunks = chunk_text("short paragraph", 100);
        assert_eq!(chunks, vec!["short paragraph"]);
    }

    #[test]
    fn test_chunk_packs_paragraphs() {
        let text = "aaaa\n\nbbbb\n\ncccc";
        let chunks = chunk_text(text, 100);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("aaaa") && chunks[0].contains("cccc"));
    }

    #[test]
    fn test_chunk_respects_limit() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks.len(), 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 100);
        }
    }

    #[test]
    fn test_chunk_splits_oversized_paragraph() {
        let text = "x".repeat(250);
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 100);
        assert_eq!(chunks[2].len(), 50);
    }

    #[test]
    fn test_chunk_multibyte_boundary() {
        // 3-byte chars; a cut at byte 100 would not be a char boundary.
        let text = "あ".repeat(80);
        let chunks = chunk_text(&text, 100);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.len() <= 100);
        }
        assert_eq!(chunks.concat(), text);
    }
}
