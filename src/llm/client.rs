use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::types::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse,
    ModelOptions,
};
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{LlmError, LlmResult};

/// Client for an Ollama-compatible chat/embeddings API
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
    temperature: f64,
    request_config: RequestConfig,
}

impl LlmClient {
    /// Create a new LLM client
    pub fn new(config: &LlmConfig, request_config: RequestConfig) -> LlmResult<Self> {
        // Only a connect timeout here; non-streaming requests get a total
        // timeout per call, and streaming generations get their own larger
        // stream budget so a stalled model cannot hang a run.
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(request_config.timeout_ms.min(10_000)))
            .build()
            .map_err(LlmError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            temperature: config.temperature,
            request_config,
        })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Run a non-streaming completion and return the assistant text.
    ///
    /// Used for the small-context calls: query planning and page
    /// summarization. Retries with exponential backoff per the request
    /// config.
    pub async fn complete(&self, messages: Vec<ChatMessage>) -> LlmResult<String> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
            options: ModelOptions {
                temperature: self.temperature,
            },
        };

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(retry = retries, delay_ms = delay.as_millis(), "Retrying LLM request");
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_chat(&url, &request).await {
                Ok(response) => {
                    info!(
                        latency_ms = start.elapsed().as_millis(),
                        "LLM completion succeeded"
                    );
                    return Ok(response.message.content);
                }
                Err(e) => {
                    error!(
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "LLM completion failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(LlmError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    /// Start a streaming completion.
    ///
    /// Returns a channel of text increments. The stream stops on the model's
    /// final chunk, on error, or when `cancel` fires, in which case the last
    /// item is `Err(LlmError::Cancelled)` and the underlying HTTP response
    /// is dropped, releasing the generation. The whole call, connect to
    /// final chunk, is bounded by the configured stream budget; a stream
    /// that stalls past it ends with `Err(LlmError::Timeout)`.
    pub async fn complete_stream(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> LlmResult<mpsc::Receiver<LlmResult<String>>> {
        let url = format!("{}/api/chat", self.base_url);
        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            stream: true,
            options: ModelOptions {
                temperature: self.temperature,
            },
        };

        debug!(model = %self.model, "Starting streaming completion");

        let stream_budget_ms = self.request_config.stream_budget_ms;
        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_millis(stream_budget_ms))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        timeout_ms: stream_budget_ms,
                    }
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(32);
        let mut byte_stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut line_buf = String::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Streaming completion cancelled");
                        let _ = tx.send(Err(LlmError::Cancelled)).await;
                        return;
                    }
                    next = byte_stream.next() => {
                        match next {
                            Some(Ok(bytes)) => {
                                line_buf.push_str(&String::from_utf8_lossy(&bytes));
                                while let Some(pos) = line_buf.find('\n') {
                                    let line = line_buf[..pos].trim().to_string();
                                    line_buf.drain(..=pos);
                                    if line.is_empty() {
                                        continue;
                                    }
                                    match serde_json::from_str::<ChatChunk>(&line) {
                                        Ok(chunk) => {
                                            if let Some(msg) = chunk.message {
                                                if !msg.content.is_empty()
                                                    && tx.send(Ok(msg.content)).await.is_err()
                                                {
                                                    return;
                                                }
                                            }
                                            if chunk.done {
                                                return;
                                            }
                                        }
                                        Err(e) => {
                                            let _ = tx
                                                .send(Err(LlmError::InvalidResponse {
                                                    message: format!(
                                                        "Failed to parse stream chunk: {}",
                                                        e
                                                    ),
                                                }))
                                                .await;
                                            return;
                                        }
                                    }
                                }
                            }
                            Some(Err(e)) => {
                                let err = if e.is_timeout() {
                                    LlmError::Timeout {
                                        timeout_ms: stream_budget_ms,
                                    }
                                } else {
                                    LlmError::Http(e)
                                };
                                let _ = tx.send(Err(err)).await;
                                return;
                            }
                            None => return,
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    /// Embed a text chunk into a dense vector.
    pub async fn embed(&self, text: &str) -> LlmResult<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            prompt: text.to_string(),
        };

        let start = Instant::now();

        let response = self
            .client
            .post(&url)
            .timeout(Duration::from_millis(self.request_config.timeout_ms))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let parsed: EmbeddingResponse =
            response.json().await.map_err(|e| LlmError::InvalidResponse {
                message: format!("Failed to parse embedding response: {}", e),
            })?;

        if parsed.embedding.is_empty() {
            return Err(LlmError::InvalidResponse {
                message: "Empty embedding vector".to_string(),
            });
        }

        debug!(
            dims = parsed.embedding.len(),
            latency_ms = start.elapsed().as_millis(),
            "Embedding computed"
        );

        Ok(parsed.embedding)
    }

    /// Execute a single non-streaming chat request (internal)
    async fn execute_chat(&self, url: &str, request: &ChatRequest) -> LlmResult<ChatResponse> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            "Calling chat endpoint"
        );

        let response = self
            .client
            .post(url)
            .timeout(Duration::from_millis(self.request_config.timeout_ms))
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        response.json().await.map_err(|e| LlmError::InvalidResponse {
            message: format!("Failed to parse response: {}", e),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> LlmError {
        if e.is_timeout() {
            LlmError::Timeout {
                timeout_ms: self.request_config.timeout_ms,
            }
        } else {
            LlmError::Http(e)
        }
    }
}
