//! Intent planner: classifies a request into analysis intents and resolves
//! entity references against the instrument catalog.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use super::{EntityRef, Intent, IntentKind, ResearchRequest};
use crate::store::FactStore;

/// TSE-style sector vocabulary recognized in requests (English and Japanese).
const SECTOR_TERMS: &[(&str, &str)] = &[
    ("automotive", "Automotive"),
    ("自動車", "Automotive"),
    ("bank", "Banking"),
    ("銀行", "Banking"),
    ("pharmaceutical", "Pharmaceutical"),
    ("医薬品", "Pharmaceutical"),
    ("electronics", "Electronics"),
    ("電機", "Electronics"),
    ("retail", "Retail"),
    ("小売", "Retail"),
    ("energy", "Energy"),
    ("エネルギー", "Energy"),
    ("telecom", "Telecom"),
    ("通信", "Telecom"),
    ("real estate", "Real Estate"),
    ("不動産", "Real Estate"),
    ("semiconductor", "Semiconductor"),
    ("半導体", "Semiconductor"),
];

const COMPARATIVE_MARKERS: &[&str] = &["compare", " vs ", "versus", "比較", "どちら", "どっち"];

const MACRO_MARKERS: &[&str] = &[
    "macro", "economy", "economic", "market outlook", "interest rate", "exchange rate", "inflation",
    "日経平均", "金利", "為替", "景気", "インフレ", "市況", "相場全体",
];

const FINANCIAL_MARKERS: &[&str] = &[
    "stock", "share", "equit", "invest", "price", "earning", "dividend", "valuation", "per", "pbr",
    "roe", "ipo", "株", "銘柄", "投資", "株価", "決算", "配当", "業績", "財務", "チャート",
];

fn ticker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // TSE codes: four digits, optionally followed by .T. ASCII word
    // boundaries so a code followed by kana/kanji still matches.
    RE.get_or_init(|| Regex::new(r"(?-u:\b)(\d{4})(?:\.T)?(?-u:\b)").expect("valid regex"))
}

/// Classifies requests into intents. Output is never empty; a request with
/// no extractable financial intent yields a single out-of-domain intent.
#[derive(Clone)]
pub struct IntentPlanner {
    catalog: Arc<dyn FactStore>,
}

impl IntentPlanner {
    /// Create a planner over the instrument catalog.
    pub fn new(catalog: Arc<dyn FactStore>) -> Self {
        Self { catalog }
    }

    /// Plan intents for a request.
    ///
    /// Entity resolution failures degrade to unresolved references; catalog
    /// lookup errors are absorbed the same way and never fail planning.
    pub async fn plan(&self, request: &ResearchRequest) -> Vec<Intent> {
        let text = &request.raw_text;
        let lower = text.to_lowercase();

        let entities = self.resolve_entities(request).await;
        let resolved_count = entities.iter().filter(|e| e.is_resolved()).count();
        let sectors = matched_sectors(&lower);
        let time_window = detect_time_window(&lower);

        let comparative = COMPARATIVE_MARKERS.iter().any(|m| lower.contains(m));
        let macro_request = MACRO_MARKERS.iter().any(|m| lower.contains(m));
        let financial = FINANCIAL_MARKERS.iter().any(|m| lower.contains(m));

        debug!(
            entities = entities.len(),
            resolved = resolved_count,
            sectors = sectors.len(),
            comparative,
            macro_request,
            "Request classified"
        );

        let mut intents = Vec::new();

        if comparative && entities.len() >= 2 {
            intents.push(Intent {
                kind: IntentKind::Comparative,
                topic: topic_for(&entities, text),
                entities,
                time_window,
            });
        } else if !entities.is_empty() {
            // Non-comparative multi-entity requests fan out, one intent per
            // entity, merged again at synthesis time.
            for entity in entities {
                intents.push(Intent {
                    kind: IntentKind::SingleInstrument,
                    topic: topic_for(std::slice::from_ref(&entity), text),
                    entities: vec![entity],
                    time_window,
                });
            }
        }

        for sector in sectors {
            intents.push(Intent {
                kind: IntentKind::Sector,
                entities: vec![EntityRef {
                    query: sector.clone(),
                    instrument: None,
                }],
                time_window,
                topic: format!("{} sector: {}", sector, text),
            });
        }

        if macro_request {
            intents.push(Intent {
                kind: IntentKind::Macro,
                entities: Vec::new(),
                time_window,
                topic: text.clone(),
            });
        }

        if intents.is_empty() {
            let kind = if financial {
                IntentKind::General
            } else {
                IntentKind::OutOfDomain
            };
            intents.push(Intent {
                kind,
                entities: Vec::new(),
                time_window,
                topic: text.clone(),
            });
        }

        intents
    }

    /// Extract candidate references (explicit targets plus ticker codes
    /// found in the text) and resolve them against the catalog.
    async fn resolve_entities(&self, request: &ResearchRequest) -> Vec<EntityRef> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<String> = Vec::new();

        for target in &request.targets {
            let target = target.trim();
            if !target.is_empty() && seen.insert(target.to_lowercase()) {
                candidates.push(target.to_string());
            }
        }

        for cap in ticker_regex().captures_iter(&request.raw_text) {
            let code = cap[1].to_string();
            if seen.insert(code.clone()) {
                candidates.push(code);
            }
        }

        let mut entities = Vec::with_capacity(candidates.len());
        for query in candidates {
            let instrument = match self.catalog.resolve_instrument(&query).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(query, error = %e, "Catalog lookup failed, marking unresolved");
                    None
                }
            };
            if instrument.is_none() {
                debug!(query, "Entity reference did not resolve");
            }
            entities.push(EntityRef { query, instrument });
        }

        entities
    }
}

fn matched_sectors(lower: &str) -> Vec<String> {
    let mut found = Vec::new();
    for (marker, sector) in SECTOR_TERMS {
        if lower.contains(marker) && !found.iter().any(|s: &String| s == sector) {
            found.push(sector.to_string());
        }
    }
    found
}

fn detect_time_window(lower: &str) -> Option<chrono::Duration> {
    if lower.contains("today") || lower.contains("今日") || lower.contains("本日") {
        Some(chrono::Duration::days(1))
    } else if lower.contains("this week") || lower.contains("今週") {
        Some(chrono::Duration::days(7))
    } else if lower.contains("this month") || lower.contains("今月") {
        Some(chrono::Duration::days(31))
    } else if lower.contains("this year") || lower.contains("今年") {
        Some(chrono::Duration::days(365))
    } else {
        None
    }
}

fn topic_for(entities: &[EntityRef], text: &str) -> String {
    let names: Vec<&str> = entities
        .iter()
        .map(|e| {
            e.instrument
                .as_ref()
                .map(|i| i.name.as_str())
                .unwrap_or(e.query.as_str())
        })
        .collect();
    if names.is_empty() {
        text.to_string()
    } else {
        format!("{}: {}", names.join(", "), text)
    }
}
