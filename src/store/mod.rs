//! Structured fact store: instrument catalog and TTL-aware per-instrument
//! facts (prices, fundamentals, cached indicator results).
//!
//! The store is externally owned state with an explicit read/write contract;
//! the pipeline never keeps global in-process caches of its own. Indicator
//! math lives behind the [`AnalyticsProvider`] collaborator and is only
//! reached through the cache-miss path of [`FactCache`].

mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::error::StoreResult;

/// An entry in the instrument catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    /// Exchange ticker code (e.g. "7203").
    pub ticker: String,
    /// Company name.
    pub name: String,
    /// TSE sector classification, when known.
    pub sector: Option<String>,
}

/// A cached fact for one instrument field.
#[derive(Debug, Clone)]
pub struct FactRecord {
    /// Instrument ticker.
    pub ticker: String,
    /// Field name (e.g. "current_price", "per", "roe").
    pub field: String,
    /// JSON-serializable scalar or nested record.
    pub value: serde_json::Value,
    /// When the value was retrieved from its upstream source.
    pub retrieved_at: DateTime<Utc>,
}

/// TTL class of a fact field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactClass {
    /// Intraday data: fresh for minutes.
    Price,
    /// Fundamentals and indicators: fresh for days.
    Fundamental,
    /// News-derived data: fresh for tens of minutes.
    News,
}

impl FactClass {
    /// Classify a field name into its TTL class.
    pub fn of(field: &str) -> Self {
        match field {
            "current_price" | "open" | "high" | "low" | "close" | "volume" => FactClass::Price,
            f if f.starts_with("news_") => FactClass::News,
            _ => FactClass::Fundamental,
        }
    }

    /// TTL in seconds for this class, per configuration.
    pub fn ttl_secs(&self, config: &RetrievalConfig) -> i64 {
        match self {
            FactClass::Price => config.price_ttl_secs,
            FactClass::Fundamental => config.fundamental_ttl_secs,
            FactClass::News => config.news_ttl_secs,
        }
    }
}

impl FactRecord {
    /// Create a record timestamped now.
    pub fn new(
        ticker: impl Into<String>,
        field: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            field: field.into(),
            value,
            retrieved_at: Utc::now(),
        }
    }

    /// Whether the record is still within its TTL at `now`.
    pub fn is_fresh(&self, now: DateTime<Utc>, config: &RetrievalConfig) -> bool {
        let ttl = FactClass::of(&self.field).ttl_secs(config);
        now - self.retrieved_at <= Duration::seconds(ttl)
    }

    /// Store key used as evidence provenance.
    pub fn store_key(&self) -> String {
        format!("store:{}/{}", self.ticker, self.field)
    }
}

/// Typed key/value access to per-instrument facts and the instrument catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FactStore: Send + Sync {
    /// Get a fact by ticker and field, with its retrieval timestamp.
    async fn get_fact(&self, ticker: &str, field: &str) -> StoreResult<Option<FactRecord>>;
    /// Write a fact (last-write-wins by retrieved_at).
    async fn put_fact(&self, record: &FactRecord) -> StoreResult<()>;
    /// Resolve a free-text reference (ticker code or company name).
    async fn resolve_instrument(&self, query: &str) -> StoreResult<Option<Instrument>>;
    /// List catalog entries for a sector.
    async fn search_by_sector(&self, sector: &str) -> StoreResult<Vec<Instrument>>;
    /// Insert or update a catalog entry.
    async fn upsert_instrument(&self, instrument: &Instrument) -> StoreResult<()>;
}

/// Deterministic indicator/valuation collaborator.
///
/// Pure over time series; the pipeline never duplicates its math and only
/// invokes it when the structured store misses or is stale.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsProvider: Send + Sync {
    /// Compute the requested indicator fields for an instrument.
    async fn compute(
        &self,
        ticker: &str,
        fields: &[String],
    ) -> StoreResult<HashMap<String, serde_json::Value>>;
}

/// Analytics stub that computes nothing; misses stay misses.
pub struct NullAnalytics;

#[async_trait]
impl AnalyticsProvider for NullAnalytics {
    async fn compute(
        &self,
        _ticker: &str,
        _fields: &[String],
    ) -> StoreResult<HashMap<String, serde_json::Value>> {
        Ok(HashMap::new())
    }
}

/// TTL-aware read path over the fact store with the analytics cache-miss hook.
#[derive(Clone)]
pub struct FactCache {
    store: Arc<dyn FactStore>,
    analytics: Arc<dyn AnalyticsProvider>,
    config: RetrievalConfig,
}

impl FactCache {
    /// Create a new fact cache over a store and analytics collaborator.
    pub fn new(
        store: Arc<dyn FactStore>,
        analytics: Arc<dyn AnalyticsProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            analytics,
            config,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn FactStore> {
        &self.store
    }

    /// Fetch a fresh fact, recomputing through the analytics collaborator on
    /// a miss or a stale hit. Returns `None` when neither the cache nor the
    /// collaborator can produce the value; staleness is then reported via
    /// the (possibly stale) record being absent from the fresh set.
    pub async fn get_fresh(&self, ticker: &str, field: &str) -> StoreResult<Option<FactRecord>> {
        let cached = self.lookup_with_retry(ticker, field).await?;
        let now = Utc::now();

        if let Some(record) = &cached {
            if record.is_fresh(now, &self.config) {
                return Ok(cached);
            }
            debug!(ticker, field, age_secs = (now - record.retrieved_at).num_seconds(),
                "Cached fact is stale, trying analytics refresh");
        }

        let fields = [field.to_string()];
        match self.analytics.compute(ticker, &fields).await {
            Ok(mut computed) => {
                if let Some(value) = computed.remove(field) {
                    let record = FactRecord::new(ticker, field, value);
                    self.store.put_fact(&record).await?;
                    return Ok(Some(record));
                }
            }
            Err(e) => {
                // Degrades to an evidence shortfall, never fatal here.
                warn!(ticker, field, error = %e, "Analytics refresh failed");
            }
        }

        // Fall back to the stale record so the caller can decide; freshness
        // is re-checked by the orchestrator when scoring evidence.
        Ok(cached)
    }

    /// Single retry on transient lookup errors, per the retry policy table.
    async fn lookup_with_retry(&self, ticker: &str, field: &str) -> StoreResult<Option<FactRecord>> {
        match self.store.get_fact(ticker, field).await {
            Ok(v) => Ok(v),
            Err(first) => {
                warn!(ticker, field, error = %first, "Fact lookup failed, retrying once");
                self.store.get_fact(ticker, field).await
            }
        }
    }

    /// Whether a record currently counts as fresh.
    pub fn is_fresh(&self, record: &FactRecord) -> bool {
        record.is_fresh(Utc::now(), &self.config)
    }
}
