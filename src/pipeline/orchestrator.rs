//! Retrieval orchestrator: decides which combination of structured lookups,
//! vector search, and live web research to run for each intent, and merges
//! everything into one evidence bundle.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::evidence::{EvidenceBundle, EvidenceItem, SourceKind};
use super::{Intent, IntentKind, ResearchDepth};
use crate::config::RetrievalConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::llm::LlmClient;
use crate::store::{FactCache, Instrument};
use crate::vector::{DocFilter, DocType, EmbeddingIndexer, VectorStore};
use crate::web::{ResearchTopic, WebResearchAgent};

/// Fields fetched from the structured store per intent kind.
fn fields_for(kind: IntentKind) -> &'static [&'static str] {
    match kind {
        IntentKind::SingleInstrument | IntentKind::Comparative => &[
            "current_price",
            "per",
            "pbr",
            "roe",
            "dividend_yield",
            "market_cap",
        ],
        IntentKind::Sector => &["current_price", "per"],
        _ => &[],
    }
}

/// Sector intents pull structured facts for at most this many members.
const SECTOR_MEMBER_CAP: usize = 5;

/// Tracks whether the stores answered at all during one gather pass.
///
/// Transient per-source errors are absorbed here as shortfalls; only total,
/// cross-source unavailability is promoted to a fatal pipeline error.
#[derive(Debug, Default)]
struct StoreHealth {
    structured_ok: usize,
    structured_err: usize,
    vector_ok: usize,
    vector_err: usize,
}

impl StoreHealth {
    fn attempted(&self) -> bool {
        self.structured_ok + self.structured_err + self.vector_ok + self.vector_err > 0
    }

    fn all_failed(&self) -> bool {
        self.attempted() && self.structured_ok == 0 && self.vector_ok == 0
    }
}

/// Per-request retrieval driver. Owns the evidence bundle until synthesis.
#[derive(Clone)]
pub struct RetrievalOrchestrator {
    facts: FactCache,
    vector: Arc<dyn VectorStore>,
    llm: LlmClient,
    web: Arc<WebResearchAgent>,
    indexer: EmbeddingIndexer,
    config: RetrievalConfig,
}

impl RetrievalOrchestrator {
    /// Wire an orchestrator from its collaborators.
    pub fn new(
        facts: FactCache,
        vector: Arc<dyn VectorStore>,
        llm: LlmClient,
        web: Arc<WebResearchAgent>,
        indexer: EmbeddingIndexer,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            facts,
            vector,
            llm,
            web,
            indexer,
            config,
        }
    }

    /// Gather evidence for all intents into one deduplicated, budget-capped
    /// bundle.
    ///
    /// Per-source failures degrade to evidence shortfalls. The only fatal
    /// outcome is total store unavailability; cancellation aborts cleanly.
    pub async fn gather(
        &self,
        intents: &[Intent],
        depth: ResearchDepth,
        cancel: &CancellationToken,
    ) -> PipelineResult<EvidenceBundle> {
        let mut bundle = EvidenceBundle::new();
        let mut health = StoreHealth::default();

        for intent in intents {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let intent_bundle = self
                .gather_for_intent(intent, depth, cancel, &mut health)
                .await;
            bundle.extend(intent_bundle);
        }

        if health.all_failed() {
            return Err(PipelineError::StoreUnavailable {
                message: format!(
                    "{} structured and {} vector lookups failed, none succeeded",
                    health.structured_err, health.vector_err
                ),
            });
        }

        bundle.dedup(self.config.dedup_threshold);
        let budget = match depth {
            ResearchDepth::Quick => self.config.token_budget / 2,
            _ => self.config.token_budget,
        };
        bundle.truncate_to_budget(budget);

        info!(
            items = bundle.len(),
            tokens = bundle.estimated_tokens(),
            sufficiency = bundle.sufficiency(&self.config),
            "Evidence gathered"
        );

        Ok(bundle)
    }

    async fn gather_for_intent(
        &self,
        intent: &Intent,
        depth: ResearchDepth,
        cancel: &CancellationToken,
        health: &mut StoreHealth,
    ) -> EvidenceBundle {
        let mut bundle = EvidenceBundle::new();
        if intent.kind == IntentKind::OutOfDomain {
            return bundle;
        }

        let instruments = self.instruments_for(intent, health).await;

        self.structured_lookup(intent, &instruments, &mut bundle, health)
            .await;
        self.vector_lookup(intent, &instruments, &mut bundle, health)
            .await;

        // Quick depth never escalates; with both stores down escalation is
        // pointless, the gather is about to fail fatally anyway.
        if depth != ResearchDepth::Quick && !health.all_failed() {
            self.escalate_to_web(intent, &instruments, &mut bundle, cancel)
                .await;
        }

        debug!(
            kind = ?intent.kind,
            topic = %intent.topic,
            items = bundle.len(),
            "Intent retrieval finished"
        );

        bundle
    }

    /// Resolve which instruments an intent covers. Sector intents expand to
    /// a bounded set of catalog members.
    async fn instruments_for(&self, intent: &Intent, health: &mut StoreHealth) -> Vec<Instrument> {
        if intent.kind != IntentKind::Sector {
            return intent.resolved().cloned().collect();
        }

        let mut members = Vec::new();
        for entity in &intent.entities {
            match self.facts.store().search_by_sector(&entity.query).await {
                Ok(found) => {
                    health.structured_ok += 1;
                    members.extend(found);
                }
                Err(e) => {
                    health.structured_err += 1;
                    warn!(sector = %entity.query, error = %e, "Sector search failed");
                }
            }
        }
        members.truncate(SECTOR_MEMBER_CAP);
        members
    }

    async fn structured_lookup(
        &self,
        intent: &Intent,
        instruments: &[Instrument],
        bundle: &mut EvidenceBundle,
        health: &mut StoreHealth,
    ) {
        for instrument in instruments {
            for field in fields_for(intent.kind) {
                match self.facts.get_fresh(&instrument.ticker, field).await {
                    Ok(Some(record)) => {
                        health.structured_ok += 1;
                        let fresh = self.facts.is_fresh(&record);
                        let relevance = if fresh { 0.95 } else { 0.6 };
                        let content = format!(
                            "{} ({}) {}: {}",
                            instrument.name, instrument.ticker, field, record.value
                        );
                        if let Some(item) = EvidenceItem::new(
                            SourceKind::StructuredFact,
                            content,
                            record.store_key(),
                            record.retrieved_at,
                            relevance,
                            fresh,
                        ) {
                            bundle.push(item);
                        }
                    }
                    Ok(None) => {
                        // The store answered; the field just is not there.
                        health.structured_ok += 1;
                        debug!(ticker = %instrument.ticker, field, "Fact missing, needs refresh");
                    }
                    Err(e) => {
                        health.structured_err += 1;
                        warn!(ticker = %instrument.ticker, field, error = %e, "Fact lookup failed");
                    }
                }
            }
        }
    }

    async fn vector_lookup(
        &self,
        intent: &Intent,
        instruments: &[Instrument],
        bundle: &mut EvidenceBundle,
        health: &mut StoreHealth,
    ) {
        let embedding = match self.llm.embed(&intent.topic).await {
            Ok(v) => v,
            Err(e) => {
                // Embedding failure degrades vector search, it says nothing
                // about store health.
                warn!(error = %e, "Query embedding failed, skipping vector search");
                return;
            }
        };

        let since = intent.time_window.map(|w| Utc::now() - w);
        let mut filters: Vec<DocFilter> = instruments
            .iter()
            .map(|i| DocFilter::new().with_ticker(i.ticker.clone()))
            .collect();
        if filters.is_empty() {
            filters.push(DocFilter::new());
        }

        for mut filter in filters {
            filter.since = since;
            match self
                .vector
                .query_similar(&embedding, &filter, self.config.top_k)
                .await
            {
                Ok(hits) => {
                    health.vector_ok += 1;
                    for (doc, score) in hits {
                        let age = Utc::now() - doc.indexed_at;
                        let fresh = age.num_seconds() <= self.config.news_ttl_secs;
                        if let Some(item) = EvidenceItem::new(
                            SourceKind::VectorHit,
                            doc.content,
                            doc.source,
                            doc.indexed_at,
                            score as f64,
                            fresh,
                        ) {
                            bundle.push(item);
                        }
                    }
                }
                Err(e) => {
                    health.vector_err += 1;
                    warn!(error = %e, "Vector search failed");
                }
            }
        }
    }

    /// Escalate to live web research until the sufficiency threshold is met
    /// or the escalation budget runs out.
    async fn escalate_to_web(
        &self,
        intent: &Intent,
        instruments: &[Instrument],
        bundle: &mut EvidenceBundle,
        cancel: &CancellationToken,
    ) {
        let mut rounds = 0;
        while bundle.sufficiency(&self.config) < self.config.sufficiency_threshold
            && rounds < self.config.max_escalations
            && !cancel.is_cancelled()
        {
            rounds += 1;
            info!(topic = %intent.topic, round = rounds, "Escalating to web research");

            let topic = ResearchTopic {
                topic: intent.topic.clone(),
                terms: scoring_terms(intent),
            };
            let snippets = self.web.research(&topic, cancel).await;

            let mut added = 0;
            for snippet in snippets {
                let already_have = bundle
                    .items()
                    .iter()
                    .any(|i| i.provenance.source == snippet.url);
                if already_have {
                    continue;
                }

                self.index_in_background(intent, &snippet.url, &snippet.content);

                if let Some(item) = EvidenceItem::new(
                    SourceKind::WebSnippet,
                    snippet.content,
                    snippet.url,
                    snippet.retrieved_at,
                    snippet.score,
                    true,
                ) {
                    bundle.push(item);
                    added += 1;
                }
            }

            if added == 0 {
                // Another identical round would change nothing.
                break;
            }
        }
    }

    /// Submit a web snippet to the indexer without blocking retrieval, so
    /// future requests can answer from the local store.
    fn index_in_background(&self, intent: &Intent, url: &str, content: &str) {
        let indexer = self.indexer.clone();
        let ticker = intent.resolved().next().map(|i| i.ticker.clone());
        let url = url.to_string();
        let content = content.to_string();
        tokio::spawn(async move {
            if let Err(e) = indexer
                .index_text(ticker.as_deref(), DocType::ResearchNote, &url, &content)
                .await
            {
                warn!(url, error = %e, "Background indexing failed");
            }
        });
    }
}

fn scoring_terms(intent: &Intent) -> Vec<String> {
    let mut terms = Vec::new();
    for entity in &intent.entities {
        if let Some(instrument) = &entity.instrument {
            terms.push(instrument.name.clone());
            terms.push(instrument.ticker.clone());
        } else {
            terms.push(entity.query.clone());
        }
    }
    terms
}
