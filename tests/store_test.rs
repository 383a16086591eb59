//! Integration tests for the SQLite store: fact storage, instrument
//! catalog, and the vector store implementation.
//!
//! Uses an in-memory SQLite database; one test exercises file-backed
//! creation through a temporary directory.

use chrono::{Duration, Utc};
use serde_json::json;

use equity_research_agent::config::DatabaseConfig;
use equity_research_agent::store::{FactRecord, FactStore, Instrument, SqliteStore};
use equity_research_agent::vector::{DocFilter, DocType, IndexedDocument, VectorStore};

/// Create an in-memory store instance for testing
async fn create_test_store() -> SqliteStore {
    SqliteStore::new_in_memory()
        .await
        .expect("Failed to create in-memory store")
}

fn toyota() -> Instrument {
    Instrument {
        ticker: "7203".to_string(),
        name: "Toyota Motor".to_string(),
        sector: Some("Automotive".to_string()),
    }
}

#[cfg(test)]
mod fact_tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_fact() {
        let store = create_test_store().await;

        let record = FactRecord::new("7203", "per", json!(10.5));
        store.put_fact(&record).await.unwrap();

        let retrieved = store.get_fact("7203", "per").await.unwrap().unwrap();
        assert_eq!(retrieved.ticker, "7203");
        assert_eq!(retrieved.field, "per");
        assert_eq!(retrieved.value, json!(10.5));
    }

    #[tokio::test]
    async fn test_get_missing_fact() {
        let store = create_test_store().await;

        let result = store.get_fact("7203", "per").await.unwrap();
        assert!(result.is_none(), "Should return None for missing fact");
    }

    #[tokio::test]
    async fn test_nested_fact_value_roundtrip() {
        let store = create_test_store().await;

        let value = json!({"high": 2480.0, "low": 2410.0, "dates": ["2026-08-21"]});
        let record = FactRecord::new("7203", "price_range", value.clone());
        store.put_fact(&record).await.unwrap();

        let retrieved = store.get_fact("7203", "price_range").await.unwrap().unwrap();
        assert_eq!(retrieved.value, value);
    }

    #[tokio::test]
    async fn test_newer_write_wins() {
        let store = create_test_store().await;

        let old = FactRecord::new("7203", "per", json!(10.0));
        store.put_fact(&old).await.unwrap();

        let mut newer = FactRecord::new("7203", "per", json!(11.0));
        newer.retrieved_at = old.retrieved_at + Duration::seconds(60);
        store.put_fact(&newer).await.unwrap();

        let retrieved = store.get_fact("7203", "per").await.unwrap().unwrap();
        assert_eq!(retrieved.value, json!(11.0));
    }

    #[tokio::test]
    async fn test_older_write_does_not_clobber() {
        let store = create_test_store().await;

        let current = FactRecord::new("7203", "per", json!(11.0));
        store.put_fact(&current).await.unwrap();

        let mut stale = FactRecord::new("7203", "per", json!(9.0));
        stale.retrieved_at = current.retrieved_at - Duration::seconds(3_600);
        store.put_fact(&stale).await.unwrap();

        let retrieved = store.get_fact("7203", "per").await.unwrap().unwrap();
        assert_eq!(retrieved.value, json!(11.0), "older timestamp must lose");
    }
}

#[cfg(test)]
mod catalog_tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_by_ticker() {
        let store = create_test_store().await;
        store.upsert_instrument(&toyota()).await.unwrap();

        let found = store.resolve_instrument("7203").await.unwrap().unwrap();
        assert_eq!(found.name, "Toyota Motor");
    }

    #[tokio::test]
    async fn test_resolve_by_name_substring() {
        let store = create_test_store().await;
        store.upsert_instrument(&toyota()).await.unwrap();

        let found = store.resolve_instrument("Toyota").await.unwrap().unwrap();
        assert_eq!(found.ticker, "7203");
    }

    #[tokio::test]
    async fn test_resolve_prefers_shortest_name_match() {
        let store = create_test_store().await;
        store.upsert_instrument(&toyota()).await.unwrap();
        store
            .upsert_instrument(&Instrument {
                ticker: "7283".to_string(),
                name: "Toyota Industries Subsidiary Holdings".to_string(),
                sector: Some("Automotive".to_string()),
            })
            .await
            .unwrap();

        let found = store.resolve_instrument("Toyota").await.unwrap().unwrap();
        assert_eq!(found.ticker, "7203");
    }

    #[tokio::test]
    async fn test_resolve_unknown_returns_none() {
        let store = create_test_store().await;

        let found = store.resolve_instrument("9999").await.unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_search_by_sector() {
        let store = create_test_store().await;
        store.upsert_instrument(&toyota()).await.unwrap();
        store
            .upsert_instrument(&Instrument {
                ticker: "7267".to_string(),
                name: "Honda Motor".to_string(),
                sector: Some("Automotive".to_string()),
            })
            .await
            .unwrap();
        store
            .upsert_instrument(&Instrument {
                ticker: "8306".to_string(),
                name: "MUFG".to_string(),
                sector: Some("Banking".to_string()),
            })
            .await
            .unwrap();

        let members = store.search_by_sector("Automotive").await.unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].ticker, "7203", "ordered by ticker");
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_entry() {
        let store = create_test_store().await;
        store.upsert_instrument(&toyota()).await.unwrap();

        let mut renamed = toyota();
        renamed.name = "Toyota Motor Corporation".to_string();
        store.upsert_instrument(&renamed).await.unwrap();

        let found = store.resolve_instrument("7203").await.unwrap().unwrap();
        assert_eq!(found.name, "Toyota Motor Corporation");
    }
}

#[cfg(test)]
mod vector_tests {
    use super::*;

    fn doc(ticker: Option<&str>, doc_type: DocType, content: &str, embedding: Vec<f32>) -> IndexedDocument {
        IndexedDocument::new(
            ticker.map(str::to_string),
            doc_type,
            content,
            format!("https://example.com/{}", content.len()),
            embedding,
        )
    }

    #[tokio::test]
    async fn test_upsert_and_query_ranks_by_similarity() {
        let store = create_test_store().await;

        store
            .upsert_document(&doc(Some("7203"), DocType::News, "close match", vec![1.0, 0.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert_document(&doc(Some("7203"), DocType::News, "far match doc", vec![0.0, 1.0, 0.0]))
            .await
            .unwrap();

        let hits = store
            .query_similar(&[0.9, 0.1, 0.0], &DocFilter::new(), 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.content, "close match");
        assert!(hits[0].1 > hits[1].1, "scores must be descending");
    }

    #[tokio::test]
    async fn test_query_respects_ticker_filter() {
        let store = create_test_store().await;

        store
            .upsert_document(&doc(Some("7203"), DocType::News, "toyota note", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert_document(&doc(Some("7267"), DocType::News, "honda note!", vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = store
            .query_similar(&[1.0, 0.0], &DocFilter::new().with_ticker("7203"), 10)
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.ticker.as_deref(), Some("7203"));
    }

    #[tokio::test]
    async fn test_query_respects_doc_type_and_since_filters() {
        let store = create_test_store().await;

        store
            .upsert_document(&doc(None, DocType::News, "news chunk", vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert_document(&doc(None, DocType::ResearchNote, "note chunk!", vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = store
            .query_similar(
                &[1.0, 0.0],
                &DocFilter::new().with_doc_type(DocType::ResearchNote),
                10,
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.doc_type, DocType::ResearchNote);

        let future = Utc::now() + Duration::seconds(60);
        let hits = store
            .query_similar(&[1.0, 0.0], &DocFilter::new().with_since(future), 10)
            .await
            .unwrap();
        assert!(hits.is_empty(), "nothing indexed after the cutoff");
    }

    #[tokio::test]
    async fn test_reindex_supersedes_same_document() {
        let store = create_test_store().await;

        let first = doc(None, DocType::News, "same content", vec![1.0, 0.0]);
        store.upsert_document(&first).await.unwrap();

        let mut newer = first.clone();
        newer.embedding = vec![0.0, 1.0];
        newer.indexed_at = first.indexed_at + Duration::seconds(60);
        store.upsert_document(&newer).await.unwrap();

        let hits = store
            .query_similar(&[0.0, 1.0], &DocFilter::new(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1, "same id must not duplicate");
        assert!(hits[0].1 > 0.99);
    }

    #[tokio::test]
    async fn test_top_k_limits_results() {
        let store = create_test_store().await;

        for i in 0..5 {
            store
                .upsert_document(&doc(
                    None,
                    DocType::News,
                    &format!("chunk number {}", i),
                    vec![1.0, i as f32 * 0.1],
                ))
                .await
                .unwrap();
        }

        let hits = store
            .query_similar(&[1.0, 0.0], &DocFilter::new(), 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
    }
}

#[tokio::test]
async fn test_file_backed_store_creates_database() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig {
        path: dir.path().join("data").join("research.db"),
        max_connections: 2,
    };

    let store = SqliteStore::new(&config).await.unwrap();
    store.upsert_instrument(&toyota()).await.unwrap();

    assert!(config.path.exists(), "database file should be created");
    let found = store.resolve_instrument("7203").await.unwrap();
    assert!(found.is_some());
}
