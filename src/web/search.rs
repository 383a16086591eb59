use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{SearchHit, SearchProvider};
use crate::config::{RequestConfig, SearchConfig};
use crate::error::{WebError, WebResult};

/// Search client for a SearxNG-compatible JSON endpoint.
#[derive(Clone)]
pub struct SearxSearchClient {
    client: Client,
    base_url: String,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearxResponse {
    #[serde(default)]
    results: Vec<SearxResult>,
}

#[derive(Debug, Deserialize)]
struct SearxResult {
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

impl SearxSearchClient {
    /// Create a new search client.
    pub fn new(config: &SearchConfig, request_config: &RequestConfig) -> WebResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(WebError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_results: config.max_results,
        })
    }
}

#[async_trait]
impl SearchProvider for SearxSearchClient {
    async fn search(&self, query: &str) -> WebResult<Vec<SearchHit>> {
        let url = format!("{}/search", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("q", query), ("format", "json")])
            .send()
            .await
            .map_err(|e| WebError::Search {
                message: format!("Search request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebError::Search {
                message: format!("Search endpoint returned status {}", status.as_u16()),
            });
        }

        let parsed: SearxResponse = response.json().await.map_err(|e| WebError::Search {
            message: format!("Failed to parse search response: {}", e),
        })?;

        let hits: Vec<SearchHit> = parsed
            .results
            .into_iter()
            .take(self.max_results)
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.content,
            })
            .collect();

        debug!(query, hits = hits.len(), "Search completed");

        Ok(hits)
    }
}
