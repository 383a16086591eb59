//! Web research: search collaborator, page fetcher/extractor, and the
//! iterative Search → Fetch → Extract → Summarize → Score sub-agent.

mod agent;
mod fetch;
mod search;

pub use agent::{ResearchTopic, ScoredSnippet, WebResearchAgent};
pub use fetch::{extract_text, Fetcher};
pub use search::SearxSearchClient;

use async_trait::async_trait;

use crate::error::WebResult;

/// One candidate result from the search collaborator.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    /// Result-page snippet, when the engine provides one.
    pub snippet: String,
}

/// Web search collaborator: a query string in, ranked candidate URLs out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one search query.
    async fn search(&self, query: &str) -> WebResult<Vec<SearchHit>>;
}
