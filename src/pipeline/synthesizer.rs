//! Report synthesizer: drives the single streaming completion call with the
//! evidence bundle as grounding context, attaches citations, and grades the
//! report's completeness.

use std::sync::OnceLock;

use regex::Regex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::evidence::EvidenceBundle;
use super::{Intent, ResearchDepth, ResearchRequest};
use crate::error::{LlmError, PipelineError, PipelineResult};
use crate::llm::{ChatMessage, LlmClient};
use crate::prompts::{QUICK_SYNTHESIS_SYSTEM_PROMPT, SYNTHESIS_SYSTEM_PROMPT};

/// How completely the report answers the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Every requested entity is backed by qualifying evidence.
    Full,
    /// Some entity carries no qualifying evidence or did not resolve.
    Partial,
    /// No evidence at all; the report is general knowledge only.
    GeneralKnowledge,
}

impl std::fmt::Display for Completeness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Completeness::Full => write!(f, "full"),
            Completeness::Partial => write!(f, "partial"),
            Completeness::GeneralKnowledge => write!(f, "general_knowledge"),
        }
    }
}

/// A best-effort mapping from one claim span to the evidence backing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    /// The claim sentence as generated.
    pub claim: String,
    /// Index into the evidence bundle passed to synthesis.
    pub evidence_index: usize,
    /// The evidence item's provenance source.
    pub source: String,
}

/// The terminal artifact of a research run. Immutable once the stream closes.
#[derive(Debug, Clone)]
pub struct ResearchReport {
    pub narrative: String,
    pub citations: Vec<Citation>,
    pub completeness: Completeness,
    /// User-visible caveats (unresolved references, evidence gaps).
    pub caveats: Vec<String>,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid regex"))
}

/// Drives the final grounded generation call.
#[derive(Clone)]
pub struct ReportSynthesizer {
    llm: LlmClient,
}

impl ReportSynthesizer {
    /// Create a synthesizer over the language-model collaborator.
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Run the streaming synthesis call.
    ///
    /// Text increments are forwarded to `delta_tx` as they arrive.
    /// Cancellation stops the underlying generation and yields
    /// `PipelineError::Cancelled` without a report; any other stream error
    /// fails synthesis rather than emitting ungrounded half-text.
    pub async fn synthesize(
        &self,
        request: &ResearchRequest,
        intents: &[Intent],
        bundle: &EvidenceBundle,
        cancel: CancellationToken,
        delta_tx: mpsc::Sender<String>,
    ) -> PipelineResult<ResearchReport> {
        let system = match request.depth {
            ResearchDepth::Quick => QUICK_SYNTHESIS_SYSTEM_PROMPT,
            _ => SYNTHESIS_SYSTEM_PROMPT,
        };
        let user = render_context(request, intents, bundle);
        let messages = vec![ChatMessage::system(system), ChatMessage::user(user)];

        let mut rx = self
            .llm
            .complete_stream(messages, cancel)
            .await
            .map_err(map_llm_error)?;

        let mut narrative = String::new();
        while let Some(delta) = rx.recv().await {
            match delta {
                Ok(text) => {
                    narrative.push_str(&text);
                    if delta_tx.send(text).await.is_err() {
                        debug!("Report consumer went away, stopping synthesis");
                        return Err(PipelineError::Cancelled);
                    }
                }
                Err(e) => return Err(map_llm_error(e)),
            }
        }

        if narrative.trim().is_empty() {
            return Err(PipelineError::Generation {
                message: "Model stream ended without output".to_string(),
            });
        }

        let citations = attach_citations(&narrative, bundle);
        let (completeness, caveats) = assess_completeness(intents, bundle);

        info!(
            chars = narrative.len(),
            citations = citations.len(),
            completeness = %completeness,
            "Report synthesized"
        );

        Ok(ResearchReport {
            narrative,
            citations,
            completeness,
            caveats,
        })
    }
}

fn map_llm_error(e: LlmError) -> PipelineError {
    match e {
        LlmError::Cancelled => PipelineError::Cancelled,
        other => PipelineError::Generation {
            message: other.to_string(),
        },
    }
}

/// Render the user message: the request plus numbered evidence blocks and
/// the explicit do-not-invent instructions for unresolved references.
fn render_context(request: &ResearchRequest, intents: &[Intent], bundle: &EvidenceBundle) -> String {
    let mut out = format!("Request: {}\n", request.raw_text);

    if bundle.is_empty() {
        out.push_str(
            "\nNo evidence blocks are available. State clearly that you have no \
             data to answer with; do not provide figures.\n",
        );
    } else {
        out.push_str("\nEvidence:\n");
        for (i, item) in bundle.items().iter().enumerate() {
            let staleness = if item.fresh { "" } else { ", stale" };
            out.push_str(&format!(
                "[{}] ({}, retrieved {}{}) source: {}\n{}\n\n",
                i + 1,
                item.source_kind,
                item.provenance.retrieved_at.to_rfc3339(),
                staleness,
                item.provenance.source,
                item.content
            ));
        }
    }

    let unresolved: Vec<&str> = intents
        .iter()
        .flat_map(|i| i.unresolved())
        .map(|e| e.query.as_str())
        .collect();
    if !unresolved.is_empty() {
        out.push_str(&format!(
            "\nThe following references could not be resolved and have no data; \
             say so and do not invent figures for them: {}\n",
            unresolved.join(", ")
        ));
    }

    out
}

/// Best-effort claim-to-evidence mapping.
///
/// Explicit `[n]` markers take precedence; sentences without markers fall
/// back to a word-overlap heuristic against the evidence contents.
fn attach_citations(narrative: &str, bundle: &EvidenceBundle) -> Vec<Citation> {
    let items = bundle.items();
    if items.is_empty() {
        return Vec::new();
    }

    let mut citations = Vec::new();
    for sentence in split_sentences(narrative) {
        let mut cited = false;
        for cap in marker_regex().captures_iter(sentence) {
            if let Ok(n) = cap[1].parse::<usize>() {
                if n >= 1 && n <= items.len() {
                    citations.push(Citation {
                        claim: sentence.trim().to_string(),
                        evidence_index: n - 1,
                        source: items[n - 1].provenance.source.clone(),
                    });
                    cited = true;
                }
            }
        }
        if cited {
            continue;
        }

        if let Some(index) = best_overlap(sentence, bundle) {
            citations.push(Citation {
                claim: sentence.trim().to_string(),
                evidence_index: index,
                source: items[index].provenance.source.clone(),
            });
        }
    }
    citations
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['。', '.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// The evidence item sharing the most significant words with the sentence,
/// requiring a minimum overlap to count at all.
fn best_overlap(sentence: &str, bundle: &EvidenceBundle) -> Option<usize> {
    const MIN_OVERLAP: usize = 3;

    let words: Vec<String> = sentence
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    if words.is_empty() {
        return None;
    }

    let mut best: Option<(usize, usize)> = None;
    for (i, item) in bundle.items().iter().enumerate() {
        let content = item.content.to_lowercase();
        let overlap = words.iter().filter(|w| content.contains(w.as_str())).count();
        if overlap >= MIN_OVERLAP && best.map(|(_, o)| overlap > o).unwrap_or(true) {
            best = Some((i, overlap));
        }
    }
    best.map(|(i, _)| i)
}

/// Grade the report and collect user-visible caveats.
fn assess_completeness(intents: &[Intent], bundle: &EvidenceBundle) -> (Completeness, Vec<String>) {
    let mut caveats = Vec::new();
    for entity in intents.iter().flat_map(|i| i.unresolved()) {
        caveats.push(format!(
            "'{}' could not be resolved against the instrument catalog; no figures are given for it",
            entity.query
        ));
    }

    if bundle.is_empty() {
        caveats.push("No qualifying evidence was found; the answer is general knowledge".to_string());
        return (Completeness::GeneralKnowledge, caveats);
    }

    let mut partial = !caveats.is_empty();
    for instrument in intents.iter().flat_map(|i| i.resolved()) {
        // Stale-only coverage still reads as an evidence gap.
        let covered = bundle.items().iter().any(|item| {
            item.fresh
                && (item.content.contains(&instrument.ticker)
                    || item.provenance.source.contains(&instrument.ticker)
                    || item.content.contains(&instrument.name))
        });
        if !covered {
            partial = true;
            caveats.push(format!(
                "No fresh evidence was found for {} ({})",
                instrument.name, instrument.ticker
            ));
        }
    }

    let completeness = if partial {
        Completeness::Partial
    } else {
        Completeness::Full
    };
    (completeness, caveats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::pipeline::evidence::{EvidenceItem, SourceKind};
    use crate::pipeline::{EntityRef, IntentKind};
    use crate::store::Instrument;

    fn bundle_with(items: &[(&str, &str)]) -> EvidenceBundle {
        let mut bundle = EvidenceBundle::new();
        for (content, source) in items {
            bundle.push(
                EvidenceItem::new(
                    SourceKind::StructuredFact,
                    *content,
                    *source,
                    Utc::now(),
                    0.9,
                    true,
                )
                .unwrap(),
            );
        }
        bundle
    }

    fn toyota_intent(resolved: bool) -> Intent {
        Intent {
            kind: IntentKind::SingleInstrument,
            entities: vec![EntityRef {
                query: "7203".to_string(),
                instrument: resolved.then(|| Instrument {
                    ticker: "7203".to_string(),
                    name: "Toyota Motor".to_string(),
                    sector: None,
                }),
            }],
            time_window: None,
            topic: "Toyota Motor".to_string(),
        }
    }

    #[test]
    fn test_citations_from_markers() {
        let bundle = bundle_with(&[
            ("Toyota Motor (7203) per: 10.5", "store:7203/per"),
            ("Toyota Motor (7203) roe: 0.11", "store:7203/roe"),
        ]);
        let narrative = "The PER is 10.5 [1]. ROE stands at 11% [2].";
        let citations = attach_citations(narrative, &bundle);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].evidence_index, 0);
        assert_eq!(citations[0].source, "store:7203/per");
        assert_eq!(citations[1].evidence_index, 1);
    }

    #[test]
    fn test_citations_ignore_out_of_range_markers() {
        let bundle = bundle_with(&[("only one block", "src")]);
        let citations = attach_citations("Claim [5]. Claim [0].", &bundle);
        assert!(citations.is_empty());
    }

    #[test]
    fn test_citations_overlap_fallback() {
        let bundle = bundle_with(&[(
            "Toyota Motor reported record operating profit for the quarter",
            "https://example.com/earnings",
        )]);
        let narrative = "Toyota Motor posted a record operating profit.";
        let citations = attach_citations(narrative, &bundle);
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].source, "https://example.com/earnings");
    }

    #[test]
    fn test_completeness_full_when_entity_covered() {
        let bundle = bundle_with(&[("Toyota Motor (7203) per: 10.5", "store:7203/per")]);
        let (completeness, caveats) = assess_completeness(&[toyota_intent(true)], &bundle);
        assert_eq!(completeness, Completeness::Full);
        assert!(caveats.is_empty());
    }

    #[test]
    fn test_completeness_partial_when_unresolved() {
        let bundle = bundle_with(&[("some unrelated evidence text", "src")]);
        let (completeness, caveats) = assess_completeness(&[toyota_intent(false)], &bundle);
        assert_eq!(completeness, Completeness::Partial);
        assert!(!caveats.is_empty());
    }

    #[test]
    fn test_completeness_partial_when_entity_uncovered() {
        let bundle = bundle_with(&[("macro commentary only", "src")]);
        let (completeness, caveats) = assess_completeness(&[toyota_intent(true)], &bundle);
        assert_eq!(completeness, Completeness::Partial);
        assert!(caveats.iter().any(|c| c.contains("7203")));
    }

    #[test]
    fn test_completeness_general_knowledge_on_empty_bundle() {
        let (completeness, _) = assess_completeness(&[toyota_intent(true)], &EvidenceBundle::new());
        assert_eq!(completeness, Completeness::GeneralKnowledge);
    }

    #[test]
    fn test_render_context_numbers_evidence() {
        let bundle = bundle_with(&[
            ("first block", "store:a"),
            ("second block", "store:b"),
        ]);
        let request = ResearchRequest::new("test request");
        let rendered = render_context(&request, &[], &bundle);
        assert!(rendered.contains("[1]"));
        assert!(rendered.contains("[2]"));
        assert!(rendered.contains("store:b"));
    }

    #[test]
    fn test_render_context_flags_unresolved() {
        let request = ResearchRequest::new("9999の株価");
        let rendered = render_context(&request, &[toyota_intent(false)], &EvidenceBundle::new());
        assert!(rendered.contains("7203"));
        assert!(rendered.contains("do not invent"));
    }
}
