use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Fetcher, SearchHit, SearchProvider};
use crate::config::WebResearchConfig;
use crate::llm::{ChatMessage, LlmClient};
use crate::prompts::{QUERY_PLAN_SYSTEM_PROMPT, SUMMARIZE_SYSTEM_PROMPT};

/// What the sub-agent is researching: a topic sentence for query planning
/// and summarization, plus the terms used for relevance scoring.
#[derive(Debug, Clone)]
pub struct ResearchTopic {
    /// Human-readable research topic (from the originating intent).
    pub topic: String,
    /// Entity names, tickers, and topical keywords for scoring.
    pub terms: Vec<String>,
}

/// A summarized, relevance-scored piece of web evidence.
#[derive(Debug, Clone)]
pub struct ScoredSnippet {
    pub content: String,
    pub url: String,
    pub title: String,
    /// Relevance against the originating topic, in [0,1].
    pub score: f64,
    pub retrieved_at: DateTime<Utc>,
}

/// Iterative web research sub-agent.
///
/// Runs `Search → Fetch → Extract → Summarize → Score` per query variant,
/// bounded by the configured iteration count, wall-clock budget, and a
/// semaphore-bounded fetch pool. Per-URL failures are recorded and skipped;
/// the run as a whole cannot fail, only come back empty.
pub struct WebResearchAgent {
    llm: LlmClient,
    search: Arc<dyn SearchProvider>,
    fetcher: Fetcher,
    config: WebResearchConfig,
}

impl WebResearchAgent {
    /// Create a new sub-agent.
    pub fn new(
        llm: LlmClient,
        search: Arc<dyn SearchProvider>,
        fetcher: Fetcher,
        config: WebResearchConfig,
    ) -> Self {
        Self {
            llm,
            search,
            fetcher,
            config,
        }
    }

    /// Run one bounded research pass for a topic.
    ///
    /// Terminates early once enough high-scoring snippets are collected,
    /// when the wall-clock budget runs out, or when `cancel` fires.
    pub async fn research(
        &self,
        topic: &ResearchTopic,
        cancel: &CancellationToken,
    ) -> Vec<ScoredSnippet> {
        let deadline = Instant::now() + Duration::from_millis(self.config.wall_clock_budget_ms);
        let mut visited: HashSet<String> = HashSet::new();
        let mut snippets: Vec<ScoredSnippet> = Vec::new();

        let queries = self.plan_queries(topic).await;
        info!(topic = %topic.topic, queries = queries.len(), "Web research started");

        for query in queries.iter().take(self.config.max_queries) {
            if cancel.is_cancelled() || Instant::now() >= deadline {
                break;
            }

            let hits = match self.search.search(query).await {
                Ok(hits) => hits,
                Err(e) => {
                    warn!(query, error = %e, "Search failed, skipping query");
                    continue;
                }
            };

            let candidates: Vec<SearchHit> = hits
                .into_iter()
                .filter(|h| visited.insert(h.url.clone()))
                .take(self.config.max_fetches_per_query)
                .collect();

            let pages = self.fetch_candidates(candidates, cancel).await;

            for (hit, text) in pages {
                if cancel.is_cancelled() || Instant::now() >= deadline {
                    break;
                }

                let summary = match self.summarize(topic, &text).await {
                    Some(s) => s,
                    None => continue,
                };

                let score = relevance_score(&summary, &topic.terms);
                if score < self.config.min_snippet_score {
                    debug!(url = %hit.url, score, "Snippet below minimum score, discarded");
                    continue;
                }

                snippets.push(ScoredSnippet {
                    content: summary,
                    url: hit.url,
                    title: hit.title,
                    score,
                    retrieved_at: Utc::now(),
                });

                if snippets.len() >= self.config.target_snippets {
                    break;
                }
            }

            if snippets.len() >= self.config.target_snippets {
                break;
            }
        }

        snippets.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        info!(
            topic = %topic.topic,
            snippets = snippets.len(),
            visited = visited.len(),
            "Web research finished"
        );

        snippets
    }

    /// Plan search query variants via the model, with a deterministic
    /// fallback when the model is unavailable or returns nothing usable.
    async fn plan_queries(&self, topic: &ResearchTopic) -> Vec<String> {
        let messages = vec![
            ChatMessage::system(QUERY_PLAN_SYSTEM_PROMPT),
            ChatMessage::user(format!("Research topic: {}", topic.topic)),
        ];

        let planned: Vec<String> = match self.llm.complete(messages).await {
            Ok(response) => response
                .lines()
                .map(|l| l.trim().trim_start_matches(['-', '*', ' ']).trim().to_string())
                .filter(|l| !l.is_empty())
                .take(self.config.max_queries)
                .collect(),
            Err(e) => {
                warn!(error = %e, "Query planning failed, using fallback queries");
                Vec::new()
            }
        };

        if !planned.is_empty() {
            return planned;
        }

        let mut fallback = vec![topic.topic.clone()];
        if !topic.terms.is_empty() {
            fallback.push(topic.terms.join(" "));
        }
        fallback.dedup();
        fallback
    }

    /// Fetch candidate pages through the bounded pool. Cancellation drops
    /// all in-flight requests.
    async fn fetch_candidates(
        &self,
        hits: Vec<SearchHit>,
        cancel: &CancellationToken,
    ) -> Vec<(SearchHit, String)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches));

        let fetches = hits.into_iter().map(|hit| {
            let fetcher = self.fetcher.clone();
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore.acquire().await.ok()?;
                match fetcher.fetch_text(&hit.url).await {
                    Ok(text) => Some((hit, text)),
                    Err(e) => {
                        debug!(url = %hit.url, error = %e, "Fetch failed, skipping");
                        None
                    }
                }
            }
        });

        let results = tokio::select! {
            results = futures::future::join_all(fetches) => results,
            _ = cancel.cancelled() => return Vec::new(),
        };

        results.into_iter().flatten().collect()
    }

    /// Compress extracted page text into a bounded research note. Returns
    /// `None` for failed or irrelevant summaries.
    async fn summarize(&self, topic: &ResearchTopic, text: &str) -> Option<String> {
        let truncated: String = text.chars().take(self.config.max_extract_chars).collect();
        let messages = vec![
            ChatMessage::system(SUMMARIZE_SYSTEM_PROMPT),
            ChatMessage::user(format!("Topic: {}\n\nPage text:\n{}", topic.topic, truncated)),
        ];

        match self.llm.complete(messages).await {
            Ok(summary) => {
                let summary = summary.trim().to_string();
                if summary.is_empty() || summary.eq_ignore_ascii_case("IRRELEVANT") {
                    None
                } else {
                    Some(summary)
                }
            }
            Err(e) => {
                warn!(error = %e, "Summarization failed, dropping page");
                None
            }
        }
    }
}

/// Lexical relevance of a text against scoring terms, in [0,1].
///
/// Blend of term coverage (dominant) and raw occurrence count. Texts with
/// no terms to score against get a neutral 0.5.
pub fn relevance_score(text: &str, terms: &[String]) -> f64 {
    if terms.is_empty() {
        return 0.5;
    }

    let haystack = text.to_lowercase();
    let mut matched = 0usize;
    let mut occurrences = 0usize;

    for term in terms {
        let needle = term.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        let count = haystack.matches(&needle).count();
        if count > 0 {
            matched += 1;
            occurrences += count;
        }
    }

    let coverage = matched as f64 / terms.len() as f64;
    let density = (occurrences as f64 / (2.0 * terms.len() as f64)).min(1.0);

    (0.7 * coverage + 0.3 * density).clamp(0.0, 1.0)
}
