//! Evidence model: provenance-carrying grounding units and the
//! deduplicated, budget-capped bundle handed to the synthesizer.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::RetrievalConfig;

/// Where a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// A typed fact from the structured store.
    StructuredFact,
    /// A similarity hit from the vector store.
    VectorHit,
    /// A scored snippet from live web research.
    WebSnippet,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::StructuredFact => write!(f, "structured fact"),
            SourceKind::VectorHit => write!(f, "indexed document"),
            SourceKind::WebSnippet => write!(f, "web snippet"),
        }
    }
}

/// Origin of an evidence item: a URL or a store key, plus retrieval time.
#[derive(Debug, Clone, PartialEq)]
pub struct Provenance {
    /// Origin URL or logical store key. Never empty.
    pub source: String,
    /// When the content was retrieved from its origin.
    pub retrieved_at: DateTime<Utc>,
}

/// One provenance-carrying unit of grounding text. Immutable once created.
#[derive(Debug, Clone)]
pub struct EvidenceItem {
    pub source_kind: SourceKind,
    pub content: String,
    pub provenance: Provenance,
    /// Relevance against the originating intent, clamped to [0,1].
    pub relevance: f64,
    /// Whether the content is within its staleness bound.
    pub fresh: bool,
}

impl EvidenceItem {
    /// Create an item, refusing empty content or empty provenance.
    ///
    /// Ungrounded text is never treated as evidence, so a missing source
    /// yields `None` instead of an item.
    pub fn new(
        source_kind: SourceKind,
        content: impl Into<String>,
        source: impl Into<String>,
        retrieved_at: DateTime<Utc>,
        relevance: f64,
        fresh: bool,
    ) -> Option<Self> {
        let content = content.into();
        let source = source.into();
        if content.trim().is_empty() || source.trim().is_empty() {
            return None;
        }
        Some(Self {
            source_kind,
            content,
            provenance: Provenance {
                source,
                retrieved_at,
            },
            relevance: relevance.clamp(0.0, 1.0),
            fresh,
        })
    }

    /// Rough token estimate for budget accounting.
    pub fn estimated_tokens(&self) -> usize {
        self.content.chars().count() / 4 + 1
    }
}

/// The deduplicated, budget-capped evidence collection for one request.
///
/// Owned by the orchestrator, consumed once by the synthesizer.
#[derive(Debug, Clone, Default)]
pub struct EvidenceBundle {
    items: Vec<EvidenceItem>,
}

impl EvidenceBundle {
    /// An empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item.
    pub fn push(&mut self, item: EvidenceItem) {
        self.items.push(item);
    }

    /// Move all items out of another bundle into this one.
    pub fn extend(&mut self, other: EvidenceBundle) {
        self.items.extend(other.items);
    }

    /// The items, in order.
    pub fn items(&self) -> &[EvidenceItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total estimated tokens across all items.
    pub fn estimated_tokens(&self) -> usize {
        self.items.iter().map(EvidenceItem::estimated_tokens).sum()
    }

    /// Collapse near-duplicate items, keeping the higher-relevance instance.
    ///
    /// Items are ordered by relevance (descending) afterwards. Idempotent:
    /// a second pass with the same threshold removes nothing.
    pub fn dedup(&mut self, threshold: f64) {
        self.items.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let before = self.items.len();
        let mut kept: Vec<EvidenceItem> = Vec::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            let duplicate = kept
                .iter()
                .any(|k| jaccard_similarity(&k.content, &item.content) >= threshold);
            if duplicate {
                debug!(source = %item.provenance.source, "Dropped near-duplicate evidence");
            } else {
                kept.push(item);
            }
        }
        self.items = kept;

        if self.items.len() < before {
            debug!(before, after = self.items.len(), "Evidence deduplicated");
        }
    }

    /// Shrink the bundle to the token budget, dropping lowest-relevance
    /// items first. A single oversized item is truncated rather than
    /// dropped so the bundle never empties here.
    pub fn truncate_to_budget(&mut self, budget_tokens: usize) {
        while self.estimated_tokens() > budget_tokens && self.items.len() > 1 {
            let lowest = self
                .items
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.relevance
                        .partial_cmp(&b.relevance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i);
            if let Some(i) = lowest {
                let dropped = self.items.remove(i);
                debug!(source = %dropped.provenance.source, "Dropped evidence over token budget");
            } else {
                break;
            }
        }

        if self.items.len() == 1 {
            let max_chars = budget_tokens.saturating_mul(4);
            if let Some(item) = self.items.first_mut() {
                if item.content.chars().count() > max_chars {
                    item.content = item.content.chars().take(max_chars).collect();
                }
            }
        }
    }

    /// Monotonic sufficiency score in [0,1] combining evidence count,
    /// average relevance, and freshness. An empty bundle scores 0.
    pub fn sufficiency(&self, config: &RetrievalConfig) -> f64 {
        if self.items.is_empty() {
            return 0.0;
        }
        let n = self.items.len() as f64;
        let count_score = (n / config.min_evidence.max(1) as f64).min(1.0);
        let mean_relevance = self.items.iter().map(|i| i.relevance).sum::<f64>() / n;
        let fresh_fraction = self.items.iter().filter(|i| i.fresh).count() as f64 / n;

        0.5 * count_score + 0.3 * mean_relevance + 0.2 * fresh_fraction
    }
}

/// Jaccard similarity over lowercased word sets, in [0,1].
pub(crate) fn jaccard_similarity(a: &str, b: &str) -> f64 {
    let set_a: HashSet<String> = a.split_whitespace().map(str::to_lowercase).collect();
    let set_b: HashSet<String> = b.split_whitespace().map(str::to_lowercase).collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    intersection / union
}
