//! OpenAI-compatible chat-completion transport.
//!
//! Talks to any server that implements `POST {base_url}/chat/completions`
//! (a local Ollama server at `http://localhost:11434/v1` by default).
//! Streaming replies arrive as Server-Sent Events; [`SseDecoder`] turns raw
//! body bytes into content deltas and tolerates events split across network
//! chunks.

use crate::llm::{ChatClient, ChatRequest, LlmConfig};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

// =============================================================================
// API Errors
// =============================================================================

/// Errors specific to the chat-completion endpoint.
#[derive(Error, Debug)]
pub enum ChatApiError {
    /// Server is not running or refused the connection.
    #[error("Chat endpoint not available at '{url}': {message}")]
    ServerUnavailable { url: String, message: String },

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request (including the streamed body) exceeded its time budget.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The server answered with an `error` object.
    #[error("API error: {message}")]
    Api { message: String },

    /// Body could not be decoded.
    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    /// Transport failure while the body was streaming.
    #[error("Stream error: {message}")]
    Stream { message: String },
}

impl ChatApiError {
    /// Check if retrying the same request could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ServerUnavailable { .. } | Self::Timeout { .. } | Self::Stream { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    fn from_reqwest(err: reqwest::Error, url: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { timeout_secs }
        } else if err.is_connect() {
            Self::ServerUnavailable {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Stream {
                message: err.to_string(),
            }
        }
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Pull `error.message` out of a JSON body, if present.
fn api_error_message(value: &serde_json::Value) -> Option<String> {
    let error = value.get("error")?;
    Some(
        error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}

// =============================================================================
// SSE decoding
// =============================================================================

/// Incremental decoder for `text/event-stream` chat-completion bodies.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences and `data:` lines split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning the content deltas of every complete line.
    ///
    /// # Errors
    ///
    /// Returns [`ChatApiError::Api`] for an in-stream error object and
    /// [`ChatApiError::InvalidResponse`] for undecodable event data.
    pub fn push(&mut self, bytes: &[u8]) -> std::result::Result<Vec<String>, ChatApiError> {
        self.buffer.extend_from_slice(bytes);
        let mut deltas = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(delta) = self.decode_line(&line)? {
                deltas.push(delta);
            }
        }

        Ok(deltas)
    }

    /// Flush a trailing line that arrived without a newline.
    ///
    /// # Errors
    ///
    /// Same as [`SseDecoder::push`].
    pub fn finish(&mut self) -> std::result::Result<Option<String>, ChatApiError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let line = std::mem::take(&mut self.buffer);
        self.decode_line(&line)
    }

    fn decode_line(&mut self, raw: &[u8]) -> std::result::Result<Option<String>, ChatApiError> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\r', '\n']);

        let Some(data) = line.strip_prefix("data:") else {
            // Comments, event names, ids and blank separators carry no content.
            return Ok(None);
        };
        let data = data.trim_start();

        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }
        if data.is_empty() {
            return Ok(None);
        }

        let value: serde_json::Value =
            serde_json::from_str(data).map_err(|e| ChatApiError::InvalidResponse {
                message: format!("bad event data ({e}): {data}"),
            })?;
        if let Some(message) = api_error_message(&value) {
            return Err(ChatApiError::Api { message });
        }

        let chunk: StreamChunk =
            serde_json::from_value(value).map_err(|e| ChatApiError::InvalidResponse {
                message: e.to_string(),
            })?;

        let content: String = chunk
            .choices
            .into_iter()
            .filter_map(|c| c.delta.content)
            .collect();

        Ok(if content.is_empty() { None } else { Some(content) })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Chat client for OpenAI-compatible endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenAiCompatClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be constructed.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key(),
            timeout_secs: config.timeout_secs,
        })
    }

    /// Full URL of the completions endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(
        &self,
        request: &ChatRequest,
    ) -> std::result::Result<reqwest::Response, ChatApiError> {
        let url = self.endpoint();
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ChatApiError::from_reqwest(e, &url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatApiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn complete_inner(&self, request: &ChatRequest) -> std::result::Result<String, ChatApiError> {
        let mut request = request.clone();
        request.stream = false;

        let response = self.send(&request).await?;
        let url = self.endpoint();
        let body = response
            .text()
            .await
            .map_err(|e| ChatApiError::from_reqwest(e, &url, self.timeout_secs))?;

        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ChatApiError::InvalidResponse {
                message: format!("{e} - Body: {body}"),
            })?;
        if let Some(message) = api_error_message(&value) {
            return Err(ChatApiError::Api { message });
        }

        let parsed: CompletionResponse =
            serde_json::from_value(value).map_err(|e| ChatApiError::InvalidResponse {
                message: e.to_string(),
            })?;

        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let start = Instant::now();
        debug!(
            "Requesting completion from {} ({} chars of messages)",
            self.model,
            request.prompt_chars()
        );
        let content = self.complete_inner(request).await?;
        debug!(
            "Completion finished in {}ms ({} chars)",
            start.elapsed().as_millis(),
            content.len()
        );
        Ok(content)
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) -> Result<()> + Send),
    ) -> Result<String> {
        let start = Instant::now();
        let mut request = request.clone();
        request.stream = true;

        debug!(
            "Streaming completion from {} ({} chars of messages)",
            self.model,
            request.prompt_chars()
        );

        let response = self.send(&request).await?;
        let url = self.endpoint();
        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut full = String::new();

        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(|e| ChatApiError::from_reqwest(e, &url, self.timeout_secs))?;
            for delta in decoder.push(&bytes)? {
                on_chunk(&delta)?;
                full.push_str(&delta);
            }
            if decoder.is_done() {
                break;
            }
        }
        if let Some(delta) = decoder.finish()? {
            on_chunk(&delta)?;
            full.push_str(&delta);
        }

        debug!(
            "Stream finished in {}ms ({} chars)",
            start.elapsed().as_millis(),
            full.len()
        );
        Ok(full)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(content: &str) -> String {
        format!(
            "data: {}\n\n",
            serde_json::json!({"choices": [{"delta": {"content": content}}]})
        )
    }

    #[test]
    fn test_decoder_yields_deltas_in_order() {
        let mut decoder = SseDecoder::new();
        let body = format!("{}{}data: [DONE]\n\n", event("Hel"), event("lo"));
        let deltas = decoder.push(body.as_bytes()).unwrap();
        assert_eq!(deltas, vec!["Hel", "lo"]);
        assert!(decoder.is_done());
    }

    #[test]
    fn test_decoder_handles_split_events() {
        let mut decoder = SseDecoder::new();
        let body = event("split across chunks");
        let (a, b) = body.as_bytes().split_at(17);

        assert!(decoder.push(a).unwrap().is_empty());
        assert_eq!(decoder.push(b).unwrap(), vec!["split across chunks"]);
    }

    #[test]
    fn test_decoder_handles_split_utf8() {
        let mut decoder = SseDecoder::new();
        let body = event("héllo");
        let bytes = body.as_bytes();
        let cut = body.find('é').unwrap() + 1; // inside the two-byte sequence
        assert!(decoder.push(&bytes[..cut]).unwrap().is_empty());
        assert_eq!(decoder.push(&bytes[cut..]).unwrap(), vec!["héllo"]);
    }

    #[test]
    fn test_decoder_skips_role_only_and_comments() {
        let mut decoder = SseDecoder::new();
        let body = ": keep-alive\n\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n";
        assert!(decoder.push(body.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_decoder_surfaces_error_object() {
        let mut decoder = SseDecoder::new();
        let body = "data: {\"error\":{\"message\":\"model not found\"}}\n\n";
        match decoder.push(body.as_bytes()) {
            Err(ChatApiError::Api { message }) => assert_eq!(message, "model not found"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_decoder_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::new();
        let body = event("tail");
        let trimmed = body.trim_end();
        assert!(decoder.push(trimmed.as_bytes()).unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap(), Some("tail".to_string()));
    }

    #[test]
    fn test_decoder_rejects_garbage() {
        let mut decoder = SseDecoder::new();
        assert!(matches!(
            decoder.push(b"data: {oops\n"),
            Err(ChatApiError::InvalidResponse { .. })
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(ChatApiError::Timeout { timeout_secs: 1 }.is_retryable());
        assert!(ChatApiError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!ChatApiError::Status {
            status: 404,
            body: String::new()
        }
        .is_retryable());
        assert!(!ChatApiError::Api {
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9/v1/".to_string(),
            ..LlmConfig::default()
        };
        let client = OpenAiCompatClient::from_config(&config).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:9/v1/chat/completions");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        // Port 9 (discard) is essentially never listening for HTTP.
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            timeout_secs: 5,
            ..LlmConfig::default()
        };
        let client = OpenAiCompatClient::from_config(&config).unwrap();
        let request = ChatRequest::new("llama3", vec![crate::llm::ChatMessage::user("hi")], 8);
        assert!(client.complete(&request).await.is_err());
    }
}
