//! Pipeline controller: the top-level state machine sequencing planner,
//! orchestrator, and synthesizer, with cancellation honored at every stage
//! boundary and during the synthesis stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use super::orchestrator::RetrievalOrchestrator;
use super::planner::IntentPlanner;
use super::synthesizer::{Completeness, ReportSynthesizer, ResearchReport};
use super::{Intent, IntentKind, ResearchRequest};
use crate::config::Config;
use crate::error::{AppResult, PipelineError};
use crate::llm::LlmClient;
use crate::prompts::OUT_OF_DOMAIN_REPLY;
use crate::store::{AnalyticsProvider, FactCache, FactStore, SqliteStore};
use crate::vector::{EmbeddingIndexer, VectorStore};
use crate::web::{Fetcher, SearxSearchClient, WebResearchAgent};

/// Pipeline lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Planning,
    Retrieving,
    Synthesizing,
    Done,
    Cancelled,
    Failed,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Planning => write!(f, "planning"),
            PipelineState::Retrieving => write!(f, "retrieving"),
            PipelineState::Synthesizing => write!(f, "synthesizing"),
            PipelineState::Done => write!(f, "done"),
            PipelineState::Cancelled => write!(f, "cancelled"),
            PipelineState::Failed => write!(f, "failed"),
        }
    }
}

/// One increment of a research run as seen by the caller.
#[derive(Debug, Clone)]
pub enum ReportEvent {
    /// A piece of narrative text, in order.
    Delta(String),
    /// The finished report. Always the last event of a successful run.
    Completed(ResearchReport),
    /// A user-facing failure message. Always the last event of a failed run.
    Failed(String),
}

/// Caller's handle on a running research pipeline.
///
/// Dropping the stream or calling [`cancel`](Self::cancel) stops the
/// pipeline; a cancelled run closes the stream without a completed report.
pub struct ReportStream {
    events: mpsc::Receiver<ReportEvent>,
    cancel: CancellationToken,
}

impl ReportStream {
    /// Next event, or `None` once the run has ended.
    pub async fn next(&mut self) -> Option<ReportEvent> {
        self.events.recv().await
    }

    /// Cancel the run. In-flight fetches, store lookups, and the generation
    /// call are released; no report is emitted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The run's cancellation token, for wiring into external shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for ReportStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Top-level entry point: one instance serves many requests, each request
/// runs as an independent pipeline with no shared mutable state beyond the
/// stores.
pub struct PipelineController {
    planner: IntentPlanner,
    orchestrator: RetrievalOrchestrator,
    synthesizer: ReportSynthesizer,
}

impl PipelineController {
    /// Assemble a controller from pre-built stages.
    pub fn new(
        planner: IntentPlanner,
        orchestrator: RetrievalOrchestrator,
        synthesizer: ReportSynthesizer,
    ) -> Self {
        Self {
            planner,
            orchestrator,
            synthesizer,
        }
    }

    /// Wire the full pipeline from configuration and an opened store.
    pub fn from_config(
        config: &Config,
        store: SqliteStore,
        analytics: Arc<dyn AnalyticsProvider>,
    ) -> AppResult<Self> {
        let llm = LlmClient::new(&config.llm, config.request.clone())?;
        let search = Arc::new(SearxSearchClient::new(&config.search, &config.request)?);
        let fetcher = Fetcher::new(
            config.web_research.fetch_timeout_ms,
            config.web_research.min_extract_chars,
        )?;
        let web = Arc::new(WebResearchAgent::new(
            llm.clone(),
            search,
            fetcher,
            config.web_research.clone(),
        ));

        let vector: Arc<dyn VectorStore> = Arc::new(store.clone());
        let fact_store: Arc<dyn FactStore> = Arc::new(store);
        let facts = FactCache::new(fact_store.clone(), analytics, config.retrieval.clone());
        let indexer = EmbeddingIndexer::new(llm.clone(), vector.clone());

        Ok(Self::new(
            IntentPlanner::new(fact_store),
            RetrievalOrchestrator::new(
                facts,
                vector,
                llm.clone(),
                web,
                indexer,
                config.retrieval.clone(),
            ),
            ReportSynthesizer::new(llm),
        ))
    }

    /// Start a research run and return the caller's event stream.
    pub fn run_research(self: &Arc<Self>, request: ResearchRequest) -> ReportStream {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        let run_id = uuid::Uuid::new_v4();
        let controller = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(
            async move {
                controller.drive(request, tx, token).await;
            }
            .instrument(tracing::info_span!("research", %run_id)),
        );

        ReportStream { events: rx, cancel }
    }

    async fn drive(
        &self,
        request: ResearchRequest,
        tx: mpsc::Sender<ReportEvent>,
        cancel: CancellationToken,
    ) {
        info!(state = %PipelineState::Planning, request = %request.raw_text, "Pipeline started");
        let intents = self.planner.plan(&request).await;

        if cancel.is_cancelled() {
            info!(state = %PipelineState::Cancelled, "Pipeline cancelled during planning");
            return;
        }

        // A request with no financial intent short-circuits to a canned
        // reply without touching retrieval.
        if intents.iter().all(|i| i.kind == IntentKind::OutOfDomain) {
            let _ = tx
                .send(ReportEvent::Delta(OUT_OF_DOMAIN_REPLY.to_string()))
                .await;
            let _ = tx
                .send(ReportEvent::Completed(ResearchReport {
                    narrative: OUT_OF_DOMAIN_REPLY.to_string(),
                    citations: Vec::new(),
                    completeness: Completeness::GeneralKnowledge,
                    caveats: Vec::new(),
                }))
                .await;
            info!(state = %PipelineState::Done, "Out-of-domain request answered");
            return;
        }

        info!(state = %PipelineState::Retrieving, intents = intents.len(), "Gathering evidence");
        let bundle = match self
            .orchestrator
            .gather(&intents, request.depth, &cancel)
            .await
        {
            Ok(bundle) => bundle,
            Err(PipelineError::Cancelled) => {
                info!(state = %PipelineState::Cancelled, "Pipeline cancelled during retrieval");
                return;
            }
            Err(e) => {
                warn!(state = %PipelineState::Failed, error = %e, "Retrieval failed fatally");
                let _ = tx
                    .send(ReportEvent::Failed(failure_message(&intents, &e)))
                    .await;
                return;
            }
        };

        if cancel.is_cancelled() {
            info!(state = %PipelineState::Cancelled, "Pipeline cancelled before synthesis");
            return;
        }

        info!(state = %PipelineState::Synthesizing, evidence = bundle.len(), "Starting synthesis");
        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(32);
        let forward = {
            let tx = tx.clone();
            async move {
                while let Some(delta) = delta_rx.recv().await {
                    if tx.send(ReportEvent::Delta(delta)).await.is_err() {
                        break;
                    }
                }
            }
        };
        let synthesis =
            self.synthesizer
                .synthesize(&request, &intents, &bundle, cancel.clone(), delta_tx);

        let (result, ()) = tokio::join!(synthesis, forward);

        match result {
            Ok(report) => {
                let _ = tx.send(ReportEvent::Completed(report)).await;
                info!(state = %PipelineState::Done, "Pipeline finished");
            }
            Err(PipelineError::Cancelled) => {
                info!(state = %PipelineState::Cancelled, "Pipeline cancelled during synthesis");
            }
            Err(e) => {
                warn!(state = %PipelineState::Failed, error = %e, "Synthesis failed");
                let _ = tx
                    .send(ReportEvent::Failed(failure_message(&intents, &e)))
                    .await;
            }
        }
    }
}

/// Build the user-visible failure message: which intents could not be
/// answered and why, never a raw internal error chain.
fn failure_message(intents: &[Intent], error: &PipelineError) -> String {
    let topics: Vec<&str> = intents.iter().map(|i| i.topic.as_str()).collect();
    let reason = match error {
        PipelineError::StoreUnavailable { .. } => {
            "the local research store is unavailable".to_string()
        }
        PipelineError::Generation { .. } => "report generation failed".to_string(),
        PipelineError::Cancelled => "the run was cancelled".to_string(),
    };
    format!(
        "Could not answer the request ({}) because {}. Please try again.",
        topics.join("; "),
        reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(PipelineState::Idle.to_string(), "idle");
        assert_eq!(PipelineState::Retrieving.to_string(), "retrieving");
        assert_eq!(PipelineState::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_dropping_stream_cancels_run() {
        let (_tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let stream = ReportStream {
            events: rx,
            cancel: cancel.clone(),
        };
        assert!(!cancel.is_cancelled());
        drop(stream);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn test_failure_message_names_intents() {
        let intents = vec![Intent {
            kind: IntentKind::SingleInstrument,
            entities: Vec::new(),
            time_window: None,
            topic: "Toyota Motor: valuation".to_string(),
        }];
        let message = failure_message(
            &intents,
            &PipelineError::StoreUnavailable {
                message: "sqlite: unable to open".to_string(),
            },
        );
        assert!(message.contains("Toyota Motor: valuation"));
        assert!(message.contains("store is unavailable"));
        assert!(
            !message.contains("sqlite"),
            "raw internal errors must not leak"
        );
    }
}
