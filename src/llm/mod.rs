//! Chat-completion abstraction for the repair pipeline.
//!
//! The pipeline depends only on the shape of a chat-completion exchange:
//! a model name, an ordered list of `{role, content}` messages, a token
//! budget, an optional temperature, and either a single reply or an ordered
//! sequence of content chunks. [`ChatClient`] captures that shape; the
//! HTTP transport lives in [`openai`].
//!
//! # Example
//!
//! ```rust,ignore
//! use fixloop::llm::{ChatClient, ChatMessage, ChatRequest, MockChatClient};
//!
//! let client = MockChatClient::new().with_response("Use a list instead.");
//! let request = ChatRequest::new("llama3", vec![ChatMessage::user("why?")], 200);
//! let reply = client.complete(&request).await?;
//! ```

pub mod openai;

pub use openai::{ChatApiError, OpenAiCompatClient};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

// =============================================================================
// Message types
// =============================================================================

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// One `{role, content}` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// A chat-completion request body.
///
/// Serializes directly into the OpenAI-compatible wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens,
            temperature: None,
            stream: false,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Total characters across all messages, for logging.
    #[must_use]
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

// =============================================================================
// ChatClient trait
// =============================================================================

/// Abstraction over a chat-completion backend.
///
/// Object-safe and `Send + Sync`, so the orchestrator can hold it as
/// `Arc<dyn ChatClient>` and tests can swap in [`MockChatClient`].
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a request and return the full reply text.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is unreachable, times out, answers
    /// with a non-success status, or the body cannot be decoded.
    async fn complete(&self, request: &ChatRequest) -> Result<String>;

    /// Send a request and deliver the reply incrementally.
    ///
    /// `on_chunk` is called once per content chunk, in arrival order. The
    /// return value is the concatenation of every chunk. An error from
    /// `on_chunk` aborts the stream.
    ///
    /// The default implementation delivers the whole reply as one chunk.
    async fn stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) -> Result<()> + Send),
    ) -> Result<String> {
        let content = self.complete(request).await?;
        if !content.is_empty() {
            on_chunk(&content)?;
        }
        Ok(content)
    }

    /// Model identifier sent with every request.
    fn model_name(&self) -> &str;
}

// =============================================================================
// LLM Configuration
// =============================================================================

/// Configuration for the chat-completion endpoint.
///
/// Loaded from the `llm` section of `.fixloop/settings.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API (the `/chat/completions` path is appended).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable holding the API key. Local servers ignore the key,
    /// so the model name is sent when the variable is unset.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Token budget for fix generation.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Token budget for query rewriting.
    #[serde(default = "default_rewrite_max_tokens")]
    pub rewrite_max_tokens: u32,

    /// Sampling temperature for query rewriting.
    #[serde(default = "default_rewrite_temperature")]
    pub rewrite_temperature: f32,

    /// Whole-request timeout, including the streamed body.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_api_key_env() -> String {
    "FIXLOOP_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_rewrite_max_tokens() -> u32 {
    200
}

fn default_rewrite_temperature() -> f32 {
    0.01
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            rewrite_max_tokens: default_rewrite_max_tokens(),
            rewrite_temperature: default_rewrite_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    /// Validate the LLM configuration.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason for the first invalid value.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "base_url '{}' must start with http:// or https://",
                self.base_url
            ));
        }
        if self.model.trim().is_empty() {
            return Err("model must not be empty".to_string());
        }
        if self.max_tokens == 0 || self.rewrite_max_tokens == 0 {
            return Err("token budgets must be positive".to_string());
        }
        if !(0.0..=2.0).contains(&self.rewrite_temperature) {
            return Err(format!(
                "rewrite_temperature {} outside 0.0..=2.0",
                self.rewrite_temperature
            ));
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be positive".to_string());
        }
        Ok(())
    }

    /// Resolve the API key from the environment.
    #[must_use]
    pub fn api_key(&self) -> String {
        std::env::var(&self.api_key_env).unwrap_or_else(|_| self.model.clone())
    }
}

/// Create a chat client from configuration.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the HTTP client
/// cannot be built.
pub fn create_chat_client(config: &LlmConfig) -> Result<Box<dyn ChatClient>> {
    config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(Box::new(OpenAiCompatClient::from_config(config)?))
}

// =============================================================================
// Mock client
// =============================================================================

/// Mock chat client for testing.
///
/// Replies come from a queue of scripted responses; once the queue is empty
/// the default response is used. Every request is recorded.
///
/// # Example
///
/// ```rust,ignore
/// let client = MockChatClient::new()
///     .with_response("first")
///     .with_queued_response("second");
/// ```
#[derive(Debug)]
pub struct MockChatClient {
    response: String,
    queued: Mutex<VecDeque<String>>,
    error: Option<String>,
    model: String,
    call_count: AtomicU32,
    fail_count: AtomicU32,
    requests: Mutex<Vec<ChatRequest>>,
}

impl Default for MockChatClient {
    fn default() -> Self {
        Self {
            response: String::new(),
            queued: Mutex::new(VecDeque::new()),
            error: None,
            model: "mock-llm".to_string(),
            call_count: AtomicU32::new(0),
            fail_count: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl MockChatClient {
    /// Create a new mock client with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default response.
    #[must_use]
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Queue a response that is returned before the default one.
    #[must_use]
    pub fn with_queued_response(self, response: &str) -> Self {
        if let Ok(mut queued) = self.queued.lock() {
            queued.push_back(response.to_string());
        }
        self
    }

    /// Configure the mock to return an error on every call.
    #[must_use]
    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Fail the first N calls, then succeed.
    #[must_use]
    pub fn with_fail_count(self, count: u32) -> Self {
        self.fail_count.store(count, Ordering::SeqCst);
        self
    }

    /// Set the model name.
    #[must_use]
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model = name.to_string();
        self
    }

    /// Number of calls made so far (complete and stream).
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Copy of every request received, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_reply(&self, request: &ChatRequest) -> Result<String> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        if self.fail_count.load(Ordering::SeqCst) > 0 {
            self.fail_count.fetch_sub(1, Ordering::SeqCst);
            anyhow::bail!("Mock failure")
        }

        if let Some(ref error) = self.error {
            anyhow::bail!("{}", error)
        }

        let queued = self.queued.lock().ok().and_then(|mut q| q.pop_front());
        Ok(queued.unwrap_or_else(|| self.response.clone()))
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.next_reply(request)
    }

    async fn stream(
        &self,
        request: &ChatRequest,
        on_chunk: &mut (dyn for<'c> FnMut(&'c str) -> Result<()> + Send),
    ) -> Result<String> {
        let reply = self.next_reply(request)?;
        for chunk in reply.split_inclusive('\n') {
            on_chunk(chunk)?;
        }
        Ok(reply)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
