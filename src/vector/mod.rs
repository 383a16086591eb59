//! Semantic store: embedded text chunks (news, research notes, company
//! profiles) with metadata filtering and cosine-ranked similarity search.
//!
//! Embeddings are stored as little-endian `f32` BLOBs and ranked in-process.
//! Documents are never mutated; re-indexing the same source supersedes the
//! old row with a newer timestamp.

mod indexer;
mod store;

pub use indexer::EmbeddingIndexer;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;

/// Kind of indexed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocType {
    /// A news article chunk.
    News,
    /// An AI-produced research note (web research output).
    ResearchNote,
    /// A company business description.
    CompanyProfile,
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocType::News => write!(f, "news"),
            DocType::ResearchNote => write!(f, "research_note"),
            DocType::CompanyProfile => write!(f, "company_profile"),
        }
    }
}

impl std::str::FromStr for DocType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "news" => Ok(DocType::News),
            "research_note" => Ok(DocType::ResearchNote),
            "company_profile" => Ok(DocType::CompanyProfile),
            _ => Err(format!("Unknown doc type: {}", s)),
        }
    }
}

/// One embedded text chunk.
#[derive(Debug, Clone)]
pub struct IndexedDocument {
    /// Stable identifier derived from source + content.
    pub id: String,
    /// Instrument the chunk is about, when known.
    pub ticker: Option<String>,
    /// Document kind.
    pub doc_type: DocType,
    /// The text chunk itself.
    pub content: String,
    /// Origin URL or logical source name.
    pub source: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// When the chunk was (re)indexed.
    pub indexed_at: DateTime<Utc>,
}

impl IndexedDocument {
    /// Create a document with a content-derived id, timestamped now.
    pub fn new(
        ticker: Option<String>,
        doc_type: DocType,
        content: impl Into<String>,
        source: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let content = content.into();
        let source = source.into();
        Self {
            id: content_id(&source, &content),
            ticker,
            doc_type,
            content,
            source,
            embedding,
            indexed_at: Utc::now(),
        }
    }
}

/// Metadata filter for similarity queries.
#[derive(Debug, Clone, Default)]
pub struct DocFilter {
    /// Restrict to one instrument.
    pub ticker: Option<String>,
    /// Restrict to one document kind.
    pub doc_type: Option<DocType>,
    /// Only chunks indexed at or after this time.
    pub since: Option<DateTime<Utc>>,
}

impl DocFilter {
    /// Empty filter matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to a ticker.
    pub fn with_ticker(mut self, ticker: impl Into<String>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    /// Restrict to a document kind.
    pub fn with_doc_type(mut self, doc_type: DocType) -> Self {
        self.doc_type = Some(doc_type);
        self
    }

    /// Restrict to chunks indexed since a timestamp.
    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

/// Similarity search over embedded chunks with metadata filtering.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or supersede a document chunk.
    async fn upsert_document(&self, doc: &IndexedDocument) -> StoreResult<()>;
    /// Top-K chunks by cosine similarity to `embedding`, filtered.
    async fn query_similar(
        &self,
        embedding: &[f32],
        filter: &DocFilter,
        top_k: usize,
    ) -> StoreResult<Vec<(IndexedDocument, f32)>>;
}

/// Stable id from source + content.
pub(crate) fn content_id(source: &str, content: &str) -> String {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_content_id_is_stable() {
        let a = content_id("https://example.com", "some text");
        let b = content_id("https://example.com", "some text");
        let c = content_id("https://example.com", "other text");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_doc_type_roundtrip() {
        for t in [DocType::News, DocType::ResearchNote, DocType::CompanyProfile] {
            let s = t.to_string();
            assert_eq!(s.parse::<DocType>().unwrap(), t);
        }
        assert!("bogus".parse::<DocType>().is_err());
    }

    #[test]
    fn test_doc_filter_builder() {
        let filter = DocFilter::new()
            .with_ticker("7203")
            .with_doc_type(DocType::News);
        assert_eq!(filter.ticker.as_deref(), Some("7203"));
        assert_eq!(filter.doc_type, Some(DocType::News));
        assert!(filter.since.is_none());
    }
}
