use std::env;
use std::path::PathBuf;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub retrieval: RetrievalConfig,
    pub web_research: WebResearchConfig,
}

/// Language-model collaborator configuration (Ollama-compatible endpoint)
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f64,
}

/// Web search collaborator configuration (SearxNG-style JSON endpoint)
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub base_url: String,
    pub max_results: usize,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration for collaborator calls
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Total budget for one streaming generation, connect to final chunk.
    /// A stalled stream is cut off at this deadline.
    pub stream_budget_ms: u64,
}

/// Retrieval tunables: TTLs, top-K, sufficiency and budgets.
///
/// All values are deliberately configuration, not hard-coded assumptions.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Top-K vector hits per entity.
    pub top_k: usize,
    /// Minimum evidence count before web escalation is considered settled.
    pub min_evidence: usize,
    /// Sufficiency score threshold in [0,1] that stops escalation.
    pub sufficiency_threshold: f64,
    /// Maximum web escalation rounds per intent.
    pub max_escalations: u32,
    /// Evidence bundle budget in estimated tokens.
    pub token_budget: usize,
    /// Jaccard similarity above which two snippets are near-duplicates.
    pub dedup_threshold: f64,
    /// Price facts stay fresh for this many seconds.
    pub price_ttl_secs: i64,
    /// Fundamental facts stay fresh for this many seconds.
    pub fundamental_ttl_secs: i64,
    /// News/vector hits stay fresh for this many seconds.
    pub news_ttl_secs: i64,
}

/// Web research sub-agent bounds
#[derive(Debug, Clone)]
pub struct WebResearchConfig {
    /// Maximum query variants per intent.
    pub max_queries: usize,
    /// Maximum candidate URLs fetched per query.
    pub max_fetches_per_query: usize,
    /// Concurrent fetch pool size.
    pub max_concurrent_fetches: usize,
    /// Per-fetch timeout.
    pub fetch_timeout_ms: u64,
    /// Wall-clock budget for one sub-agent run.
    pub wall_clock_budget_ms: u64,
    /// Snippets scoring below this are discarded.
    pub min_snippet_score: f64,
    /// Early exit once this many accepted snippets are collected.
    pub target_snippets: usize,
    /// Extracted page text is truncated to this many chars before summarization.
    pub max_extract_chars: usize,
    /// Extractions shorter than this many chars count as fetch failures.
    pub min_extract_chars: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let llm = LlmConfig {
            base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: env::var("MODEL_NAME").unwrap_or_else(|_| "nemotron-3-nano".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "nomic-embed-text".to_string()),
            temperature: parse_or("LLM_TEMPERATURE", 0.3),
        };

        let search = SearchConfig {
            base_url: env::var("SEARCH_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8888".to_string()),
            max_results: parse_or("SEARCH_MAX_RESULTS", 5),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/research.db".to_string()),
            ),
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request = RequestConfig {
            timeout_ms: parse_or("REQUEST_TIMEOUT_MS", 30_000),
            max_retries: parse_or("MAX_RETRIES", 3),
            retry_delay_ms: parse_or("RETRY_DELAY_MS", 1_000),
            stream_budget_ms: parse_or("STREAM_BUDGET_MS", 300_000),
        };

        let retrieval = RetrievalConfig {
            top_k: parse_or("RETRIEVAL_TOP_K", 8),
            min_evidence: parse_or("RETRIEVAL_MIN_EVIDENCE", 3),
            sufficiency_threshold: parse_or("RETRIEVAL_SUFFICIENCY", 0.6),
            max_escalations: parse_or("RETRIEVAL_MAX_ESCALATIONS", 2),
            token_budget: parse_or("RETRIEVAL_TOKEN_BUDGET", 4_000),
            dedup_threshold: parse_or("RETRIEVAL_DEDUP_THRESHOLD", 0.55),
            price_ttl_secs: parse_or("CACHE_TTL_PRICE", 300),
            fundamental_ttl_secs: parse_or("CACHE_TTL_FUNDAMENTAL", 86_400),
            news_ttl_secs: parse_or("CACHE_TTL_NEWS", 1_800),
        };

        let web_research = WebResearchConfig {
            max_queries: parse_or("WEB_MAX_QUERIES", 3),
            max_fetches_per_query: parse_or("WEB_MAX_FETCHES_PER_QUERY", 3),
            max_concurrent_fetches: parse_or("WEB_MAX_CONCURRENT_FETCHES", 4),
            fetch_timeout_ms: parse_or("WEB_FETCH_TIMEOUT_MS", 10_000),
            wall_clock_budget_ms: parse_or("WEB_WALL_CLOCK_BUDGET_MS", 60_000),
            min_snippet_score: parse_or("WEB_MIN_SNIPPET_SCORE", 0.35),
            target_snippets: parse_or("WEB_TARGET_SNIPPETS", 4),
            max_extract_chars: parse_or("WEB_MAX_EXTRACT_CHARS", 5_000),
            min_extract_chars: parse_or("WEB_MIN_EXTRACT_CHARS", 80),
        };

        Ok(Config {
            llm,
            search,
            database,
            logging,
            request,
            retrieval,
            web_research,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 1_000,
            stream_budget_ms: 300_000,
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            min_evidence: 3,
            sufficiency_threshold: 0.6,
            max_escalations: 2,
            token_budget: 4_000,
            dedup_threshold: 0.55,
            price_ttl_secs: 300,
            fundamental_ttl_secs: 86_400,
            news_ttl_secs: 1_800,
        }
    }
}

impl Default for WebResearchConfig {
    fn default() -> Self {
        Self {
            max_queries: 3,
            max_fetches_per_query: 3,
            max_concurrent_fetches: 4,
            fetch_timeout_ms: 10_000,
            wall_clock_budget_ms: 60_000,
            min_snippet_score: 0.35,
            target_snippets: 4,
            max_extract_chars: 5_000,
            min_extract_chars: 80,
        }
    }
}
