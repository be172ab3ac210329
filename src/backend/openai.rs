//! OpenAI-compatible streaming chat backend.
//!
//! Works with any server implementing `POST /v1/chat/completions` with
//! `stream: true` (OpenAI, Ollama, vLLM, llama.cpp server, MLX server).
//! Each SSE chunk's `choices[0].delta.content` becomes one fragment.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::sse::SseLineParser;
use super::{Backend, FragmentStream};
use crate::config::BackendConfig;
use crate::error::{ConversationError, Result};
use crate::pipeline::messages::Message;

/// Backend speaking the OpenAI chat completions streaming protocol.
pub struct OpenAiBackend {
    config: BackendConfig,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiBackend {
    /// Create a backend from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| ConversationError::Backend(format!("HTTP client setup failed: {e}")))?;

        let api_key = config.resolve_api_key();
        info!(
            "API backend configured: {} model={}",
            config.base_url, config.model
        );

        Ok(Self {
            config: config.clone(),
            api_key,
            client,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{base}/v1/chat/completions")
    }

    fn request_body(&self, history: &[Message]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = history
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.as_str(),
                    "content": m.content,
                })
            })
            .collect();

        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(
        &self,
        history: &[Message],
        cancel: CancellationToken,
    ) -> Result<FragmentStream> {
        let body = self.request_body(history);
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        debug!(messages = history.len(), "sending chat completion request");
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ConversationError::Cancelled),
            response = request.send() => response
                .map_err(|e| ConversationError::Backend(format!("request failed: {e}")))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text));
        }

        Ok(Box::pin(fragment_stream(response.bytes_stream(), cancel)))
    }
}

/// Adapt an SSE byte stream into content fragments.
fn fragment_stream(
    bytes: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<String>> + Send {
    async_stream::try_stream! {
        let mut bytes = Box::pin(bytes);
        let mut parser = SseLineParser::new();

        'read: loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                chunk = bytes.next() => Some(chunk),
            };
            let Some(chunk) = chunk else {
                Err::<(), _>(ConversationError::Cancelled)?;
                break 'read;
            };
            let Some(chunk) = chunk else { break 'read };
            let chunk = chunk
                .map_err(|e| ConversationError::Backend(format!("stream read failed: {e}")))?;

            for event in parser.push(&chunk) {
                if event.is_done() {
                    break 'read;
                }
                if let Some(text) = delta_content(&event.data)? {
                    yield text;
                }
            }
        }

        if let Some(event) = parser.flush() {
            if !event.is_done() {
                if let Some(text) = delta_content(&event.data)? {
                    yield text;
                }
            }
        }
    }
}

/// Extract `choices[0].delta.content` from one streamed chunk.
fn delta_content(data: &str) -> Result<Option<String>> {
    let value: serde_json::Value = serde_json::from_str(data)
        .map_err(|e| ConversationError::Backend(format!("invalid stream chunk: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        return Err(ConversationError::Backend(format!(
            "stream reported error: {message}"
        )));
    }

    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_owned))
}

/// Map an HTTP error status to a backend error.
fn map_http_error(status: reqwest::StatusCode, body: &str) -> ConversationError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => ConversationError::Backend(format!("authentication failed: {message}")),
        429 => ConversationError::Backend(format!("rate limited: {message}")),
        code => ConversationError::Backend(format!("HTTP {code}: {message}")),
    }
}

/// Extract an error message from an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}
