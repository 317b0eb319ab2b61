//! Context-aware rewriting of a new user query.

use crate::conversation::ConversationTurn;
use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of recent turns given to the rewriter as context.
pub const REWRITE_CONTEXT_TURNS: usize = 2;

/// What happens to a rewritten query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteMode {
    /// Show and log the rewrite; send the original query.
    #[default]
    Annotate,
    /// Send the rewrite in place of the newest user message.
    Replace,
    /// Never call the rewriter.
    Off,
}

/// An original query and its rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenQuery {
    pub original: String,
    pub rewritten: String,
}

/// Rewrites a query using recent history, with near-deterministic sampling.
#[derive(Debug, Clone)]
pub struct QueryRewriter {
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl QueryRewriter {
    #[must_use]
    pub fn new(model: impl Into<String>, max_tokens: u32, temperature: f32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            temperature,
        }
    }

    /// Build the rewrite instruction for `query` given `context` turns.
    #[must_use]
    pub fn prompt(query: &str, context: &[ConversationTurn]) -> String {
        let history = context
            .iter()
            .map(|t| format!("{}: {}", t.role, t.content))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "Rewrite the following query by incorporating relevant context from the conversation history.\n\
Return ONLY the rewritten query text, without any additional formatting or explanations.\n\n\
Conversation History:\n{history}\n\n\
Original query: [{query}]\n\n\
Rewritten query:"
        )
    }

    /// Rewrite `query`. `context` should hold the most recent turns, oldest
    /// first; only the last [`REWRITE_CONTEXT_TURNS`] are used.
    ///
    /// # Errors
    ///
    /// Propagates the chat client's error.
    pub async fn rewrite(
        &self,
        client: &dyn ChatClient,
        query: &str,
        context: &[ConversationTurn],
    ) -> Result<RewrittenQuery> {
        let skip = context.len().saturating_sub(REWRITE_CONTEXT_TURNS);
        let prompt = Self::prompt(query, &context[skip..]);

        let request = ChatRequest::new(&self.model, vec![ChatMessage::system(prompt)], self.max_tokens)
            .with_temperature(self.temperature);

        let reply = client.complete(&request).await?;
        let rewritten = reply.trim().to_string();
        debug!("Rewrote query ({} -> {} chars)", query.len(), rewritten.len());

        Ok(RewrittenQuery {
            original: query.to_string(),
            rewritten,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRole, MockChatClient};

    fn turn(role: ChatRole, content: &str) -> ConversationTurn {
        ConversationTurn {
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_prompt_layout() {
        let prompt = QueryRewriter::prompt(
            "why?",
            &[turn(ChatRole::Assistant, "Use a list."), turn(ChatRole::User, "why?")],
        );
        assert!(prompt.contains("assistant: Use a list.\nuser: why?"));
        assert!(prompt.contains("Original query: [why?]"));
        assert!(prompt.contains("Return ONLY the rewritten query text"));
        assert!(prompt.ends_with("Rewritten query:"));
    }

    #[tokio::test]
    async fn test_rewrite_uses_last_two_turns_and_low_temperature() {
        let client = MockChatClient::new().with_response("  rewritten text \n");
        let rewriter = QueryRewriter::new("llama3", 200, 0.01);
        let context = vec![
            turn(ChatRole::User, "oldest"),
            turn(ChatRole::Assistant, "middle"),
            turn(ChatRole::User, "newest"),
        ];

        let result = rewriter.rewrite(&client, "newest", &context).await.unwrap();
        assert_eq!(result.rewritten, "rewritten text");
        assert_eq!(result.original, "newest");

        let request = &client.requests()[0];
        assert_eq!(request.max_tokens, 200);
        assert_eq!(request.temperature, Some(0.01));
        assert!(!request.stream);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, ChatRole::System);
        assert!(!request.messages[0].content.contains("oldest"));
        assert!(request.messages[0].content.contains("assistant: middle"));
    }

    #[tokio::test]
    async fn test_rewrite_propagates_errors() {
        let client = MockChatClient::new().with_error("offline");
        let rewriter = QueryRewriter::new("llama3", 200, 0.01);
        assert!(rewriter.rewrite(&client, "q", &[]).await.is_err());
    }

    #[test]
    fn test_mode_serde() {
        assert_eq!(serde_json::to_string(&RewriteMode::Off).unwrap(), "\"off\"");
        assert_eq!(RewriteMode::default(), RewriteMode::Annotate);
    }
}
