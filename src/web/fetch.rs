use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use tracing::debug;

use crate::error::{WebError, WebResult};

/// Page fetcher with a per-fetch timeout and plain-text extraction.
///
/// Fetch failures are never fatal to a research run; the sub-agent records
/// them and moves on.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    timeout_ms: u64,
    min_extract_chars: usize,
}

impl Fetcher {
    /// Create a fetcher with a per-fetch timeout and a minimum extraction
    /// length in characters below which a page counts as a fetch failure.
    pub fn new(timeout_ms: u64, min_extract_chars: usize) -> WebResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(WebError::Http)?;

        Ok(Self {
            client,
            timeout_ms,
            min_extract_chars,
        })
    }

    /// Fetch a URL and reduce it to plain text.
    ///
    /// PDFs are skipped (no extractor for them here), non-success statuses
    /// and empty extractions are reported as fetch failures.
    pub async fn fetch_text(&self, url: &str) -> WebResult<String> {
        if url.to_lowercase().ends_with(".pdf") {
            return Err(WebError::Fetch {
                url: url.to_string(),
                reason: "PDF documents are not extracted".to_string(),
            });
        }

        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                WebError::FetchTimeout {
                    url: url.to_string(),
                    timeout_ms: self.timeout_ms,
                }
            } else {
                WebError::Fetch {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(WebError::Fetch {
                url: url.to_string(),
                reason: format!("status {}", status.as_u16()),
            });
        }

        let body = response.text().await.map_err(|e| WebError::Fetch {
            url: url.to_string(),
            reason: format!("body read failed: {}", e),
        })?;

        let text = extract_text(&body);
        if text.chars().count() < self.min_extract_chars {
            // Near-empty extraction counts as a fetch failure.
            return Err(WebError::EmptyExtraction {
                url: url.to_string(),
            });
        }

        debug!(url, chars = text.len(), "Fetched and extracted page");

        Ok(text)
    }
}

fn strip_regexes() -> &'static [Regex; 4] {
    static REGEXES: OnceLock<[Regex; 4]> = OnceLock::new();
    REGEXES.get_or_init(|| {
        [
            Regex::new(r"(?is)<script\b.*?</script>").expect("valid regex"),
            Regex::new(r"(?is)<style\b.*?</style>").expect("valid regex"),
            Regex::new(r"(?s)<!--.*?-->").expect("valid regex"),
            Regex::new(r"(?s)<[^>]+>").expect("valid regex"),
        ]
    })
}

/// Strip markup and boilerplate from an HTML body, leaving plain text.
pub fn extract_text(html: &str) -> String {
    let mut text = html.to_string();
    for re in strip_regexes() {
        text = re.replace_all(&text, " ").into_owned();
    }

    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    // Collapse runs of whitespace but preserve paragraph breaks.
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    let mut pending_breaks = 0u32;
    for ch in text.chars() {
        if ch == '\n' {
            pending_breaks += 1;
        } else if ch.is_whitespace() {
            pending_space = true;
        } else {
            if pending_breaks >= 2 && !out.is_empty() {
                out.push_str("\n\n");
            } else if (pending_space || pending_breaks > 0) && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            pending_breaks = 0;
            out.push(ch);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_strips_tags() {
        let html = "<html><body><h1>Title</h1><p>Hello <b>world</b></p></body></html>";
        assert_eq!(extract_text(html), "Title Hello world");
    }

    #[test]
    fn test_extract_drops_scripts_and_styles() {
        let html = "<style>p { color: red }</style><p>kept</p><script>var x = '<p>no</p>';</script>";
        assert_eq!(extract_text(html), "kept");
    }

    #[test]
    fn test_extract_decodes_entities() {
        let html = "<p>A &amp; B &lt;= C</p>";
        assert_eq!(extract_text(html), "A & B <= C");
    }

    #[test]
    fn test_extract_preserves_paragraph_breaks() {
        let html = "<p>one</p>\n\n\n<p>two</p>";
        assert_eq!(extract_text(html), "one\n\ntwo");
    }

    #[test]
    fn test_extract_empty_input() {
        assert_eq!(extract_text(""), "");
        assert_eq!(extract_text("<div></div>"), "");
    }

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetch_rejects_near_empty_extraction() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/thin"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>not much here</p>"))
            .mount(&server)
            .await;

        let fetcher = Fetcher::new(1_000, 80).unwrap();
        let result = fetcher.fetch_text(&format!("{}/thin", server.uri())).await;
        assert!(matches!(result, Err(WebError::EmptyExtraction { .. })));
    }

    #[tokio::test]
    async fn test_fetch_extraction_floor_counts_chars_not_bytes() {
        // 30 Japanese chars are 90 bytes; a byte-based floor of 80 would
        // wrongly accept this page.
        let server = MockServer::start().await;
        let body = format!("<p>{}</p>", "あ".repeat(30));
        Mock::given(method("GET"))
            .and(path("/jp"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;
        let url = format!("{}/jp", server.uri());

        let strict = Fetcher::new(1_000, 80).unwrap();
        assert!(matches!(
            strict.fetch_text(&url).await,
            Err(WebError::EmptyExtraction { .. })
        ));

        let lenient = Fetcher::new(1_000, 10).unwrap();
        let text = lenient.fetch_text(&url).await.unwrap();
        assert_eq!(text.chars().count(), 30);
    }
}
