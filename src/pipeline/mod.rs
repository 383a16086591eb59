//! The research pipeline: intent planning, hybrid retrieval, streamed
//! synthesis, and the controller state machine tying them together.
//!
//! Data flows strictly top-down per request: controller, planner,
//! orchestrator (structured, vector, and web collaborators), synthesizer,
//! streamed output. Each request gets an independent pipeline instance; the
//! only shared state is the structured/vector store.

mod controller;
mod evidence;
mod orchestrator;
mod planner;
mod synthesizer;

pub use controller::{PipelineController, PipelineState, ReportEvent, ReportStream};
pub use evidence::{EvidenceBundle, EvidenceItem, Provenance, SourceKind};
pub use orchestrator::RetrievalOrchestrator;
pub use planner::IntentPlanner;
pub use synthesizer::{Citation, Completeness, ReportSynthesizer, ResearchReport};

use crate::store::Instrument;

/// One user research request. Immutable for the request's lifetime.
#[derive(Debug, Clone)]
pub struct ResearchRequest {
    /// The free-text request.
    pub raw_text: String,
    /// Explicit target entities supplied by the caller, if any.
    pub targets: Vec<String>,
    /// Requested analysis depth.
    pub depth: ResearchDepth,
}

impl ResearchRequest {
    /// A standard-depth request with no explicit targets.
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            targets: Vec::new(),
            depth: ResearchDepth::Standard,
        }
    }

    /// Set the requested depth.
    pub fn with_depth(mut self, depth: ResearchDepth) -> Self {
        self.depth = depth;
        self
    }

    /// Add an explicit target entity.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.targets.push(target.into());
        self
    }
}

/// How much work a request is worth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResearchDepth {
    /// Local evidence only, terse report, halved context budget.
    Quick,
    /// The default: full retrieval including web escalation.
    #[default]
    Standard,
    /// Same retrieval as standard with the full report contract.
    Deep,
}

/// What kind of analysis an intent asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentKind {
    /// One instrument's price, fundamentals, outlook.
    SingleInstrument,
    /// A whole sector.
    Sector,
    /// Two or more instruments side by side.
    Comparative,
    /// Market-wide or macroeconomic context.
    Macro,
    /// Financial question with no extractable entity.
    General,
    /// No financial intent at all; retrieval is skipped.
    OutOfDomain,
}

/// A free-text entity reference and its catalog resolution, when found.
///
/// Unresolved references are kept, not dropped, and surface in the report
/// as a caveat.
#[derive(Debug, Clone)]
pub struct EntityRef {
    /// The reference as written (ticker code, company name, sector term).
    pub query: String,
    /// Catalog entry, when the reference resolved.
    pub instrument: Option<Instrument>,
}

impl EntityRef {
    /// Whether this reference resolved against the catalog.
    pub fn is_resolved(&self) -> bool {
        self.instrument.is_some()
    }
}

/// A structured interpretation of (part of) a request.
#[derive(Debug, Clone)]
pub struct Intent {
    pub kind: IntentKind,
    /// Ordered entity references; may be empty for macro/general intents.
    pub entities: Vec<EntityRef>,
    /// Requested look-back window, when the request names one.
    pub time_window: Option<chrono::Duration>,
    /// Topic line used for vector search and web query planning.
    pub topic: String,
}

impl Intent {
    /// Resolved instruments among this intent's entities.
    pub fn resolved(&self) -> impl Iterator<Item = &Instrument> {
        self.entities.iter().filter_map(|e| e.instrument.as_ref())
    }

    /// Entity references that did not resolve.
    pub fn unresolved(&self) -> impl Iterator<Item = &EntityRef> {
        self.entities.iter().filter(|e| !e.is_resolved())
    }
}
