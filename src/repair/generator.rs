//! Fix generation: one streamed chat request per failure.

use super::protocol::FixProtocol;
use super::rewriter::{QueryRewriter, RewriteMode, RewrittenQuery};
use crate::conversation::{ConversationStore, ConversationTurn};
use crate::llm::{ChatClient, ChatMessage, ChatRequest, ChatRole};
use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append-only log of streamed model output.
#[derive(Debug, Clone)]
pub struct Transcript {
    path: PathBuf,
}

impl Transcript {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the transcript for appending, creating it and its parent if needed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    pub fn open(&self) -> std::io::Result<File> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }
}

/// A completed fix request.
#[derive(Debug, Clone)]
pub struct GeneratedFix {
    /// Full reply text, the concatenation of every streamed chunk.
    pub response: String,
    /// Rewrite produced for this request, if the rewriter ran.
    pub rewrite: Option<RewrittenQuery>,
}

/// Sends the system prompt plus the conversation to the model and streams
/// the reply.
#[derive(Debug, Clone)]
pub struct FixGenerator {
    protocol: FixProtocol,
    model: String,
    max_tokens: u32,
    rewriter: QueryRewriter,
    rewrite_mode: RewriteMode,
    transcript: Transcript,
}

impl FixGenerator {
    #[must_use]
    pub fn new(
        protocol: FixProtocol,
        model: impl Into<String>,
        max_tokens: u32,
        rewriter: QueryRewriter,
        rewrite_mode: RewriteMode,
        transcript: Transcript,
    ) -> Self {
        Self {
            protocol,
            model: model.into(),
            max_tokens,
            rewriter,
            rewrite_mode,
            transcript,
        }
    }

    #[must_use]
    pub fn protocol(&self) -> &FixProtocol {
        &self.protocol
    }

    #[must_use]
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Request a fix for `user_message`.
    ///
    /// Each chunk is passed to `echo` and appended to the transcript as it
    /// arrives. On success the user message and the full reply are appended
    /// to `conversation` as one exchange; on failure the conversation is left
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns the chat client's error. A failed rewrite or transcript write
    /// is logged and does not fail the request.
    pub async fn generate(
        &self,
        client: &dyn ChatClient,
        conversation: &mut ConversationStore,
        user_message: &str,
        echo: &mut (dyn for<'c> FnMut(&'c str) + Send),
    ) -> Result<GeneratedFix> {
        let rewrite = self.rewrite(client, conversation, user_message).await;

        let outgoing = match (&rewrite, self.rewrite_mode) {
            (Some(r), RewriteMode::Replace) if !r.rewritten.is_empty() => r.rewritten.clone(),
            _ => user_message.to_string(),
        };

        let mut messages = Vec::with_capacity(conversation.len() + 2);
        messages.push(ChatMessage::system(self.protocol.system_prompt()));
        messages.extend(conversation.messages());
        messages.push(ChatMessage::user(outgoing));

        let request = ChatRequest::new(&self.model, messages, self.max_tokens).streaming();

        let mut transcript = match self.transcript.open() {
            Ok(file) => Some(file),
            Err(e) => {
                warn!(
                    "Transcript {} unavailable: {}",
                    self.transcript.path.display(),
                    e
                );
                None
            }
        };

        let mut on_chunk = |chunk: &str| -> Result<()> {
            echo(chunk);
            let failed = transcript
                .as_mut()
                .and_then(|file| file.write_all(chunk.as_bytes()).err());
            if let Some(e) = failed {
                warn!("Transcript write failed, disabling: {}", e);
                transcript = None;
            }
            Ok(())
        };

        let response = client.stream(&request, &mut on_chunk).await?;
        debug!("Fix response received ({} chars)", response.len());

        conversation.append(ChatRole::User, user_message);
        conversation.append(ChatRole::Assistant, response.clone());

        Ok(GeneratedFix { response, rewrite })
    }

    async fn rewrite(
        &self,
        client: &dyn ChatClient,
        conversation: &ConversationStore,
        user_message: &str,
    ) -> Option<RewrittenQuery> {
        if self.rewrite_mode == RewriteMode::Off || conversation.is_empty() {
            return None;
        }

        // Most recent stored turn plus the new query.
        let mut context = conversation.tail(1);
        context.push(ConversationTurn {
            role: ChatRole::User,
            content: user_message.to_string(),
        });

        match self.rewriter.rewrite(client, user_message, &context).await {
            Ok(rewritten) => Some(rewritten),
            Err(e) => {
                warn!("Query rewrite failed, sending original query: {:#}", e);
                None
            }
        }
    }
}
