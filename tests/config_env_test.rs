//! Configuration loading tests
//!
//! Environment mutation is process-global, so everything lives in one test
//! function to avoid races between parallel test threads.

use pretty_assertions::assert_eq;

use equity_research_agent::config::{Config, LogFormat};

#[test]
fn test_env_overrides_and_defaults() {
    std::env::set_var("OLLAMA_BASE_URL", "http://llm.internal:11434");
    std::env::set_var("MODEL_NAME", "custom-model");
    std::env::set_var("SEARCH_BASE_URL", "http://search.internal:8888");
    std::env::set_var("DATABASE_PATH", "/tmp/research-test.db");
    std::env::set_var("LOG_FORMAT", "json");
    std::env::set_var("RETRIEVAL_TOP_K", "12");
    std::env::set_var("CACHE_TTL_PRICE", "120");
    std::env::set_var("WEB_MAX_QUERIES", "2");
    std::env::set_var("MAX_RETRIES", "not-a-number");

    let config = Config::from_env().unwrap();

    assert_eq!(config.llm.base_url, "http://llm.internal:11434");
    assert_eq!(config.llm.model, "custom-model");
    assert_eq!(config.search.base_url, "http://search.internal:8888");
    assert_eq!(
        config.database.path,
        std::path::PathBuf::from("/tmp/research-test.db")
    );
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.retrieval.top_k, 12);
    assert_eq!(config.retrieval.price_ttl_secs, 120);
    assert_eq!(config.web_research.max_queries, 2);

    // Unset or unparsable values fall back to defaults.
    assert_eq!(config.request.max_retries, 3);
    assert_eq!(config.request.stream_budget_ms, 300_000);
    assert_eq!(config.web_research.min_extract_chars, 80);
    assert_eq!(config.retrieval.sufficiency_threshold, 0.6);
    assert_eq!(config.web_research.fetch_timeout_ms, 10_000);
    assert_eq!(config.llm.embedding_model, "nomic-embed-text");
}
