//! Conversation history for one orchestrator run.
//!
//! Turns alternate user/assistant. The system prompt is never stored; it is
//! prepended per request by the fix generator.

use crate::llm::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// How much history a [`ConversationStore`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep every turn for the life of the run.
    Unbounded,
    /// Keep at most `max_turns` of the newest turns.
    Window { max_turns: usize },
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::Window { max_turns: 20 }
    }
}

/// One stored chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: ChatRole,
    pub content: String,
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        ChatMessage::new(turn.role, turn.content.clone())
    }
}

/// Ordered chat turns, trimmed according to a [`RetentionPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    turns: VecDeque<ConversationTurn>,
    policy: RetentionPolicy,
    evicted: usize,
}

impl ConversationStore {
    #[must_use]
    pub fn new(policy: RetentionPolicy) -> Self {
        Self {
            turns: VecDeque::new(),
            policy,
            evicted: 0,
        }
    }

    /// Append a turn, evicting the oldest turns if the window is full.
    ///
    /// Eviction never leaves an assistant turn at the front, so the retained
    /// history still opens with a user turn.
    pub fn append(&mut self, role: ChatRole, content: impl Into<String>) {
        self.turns.push_back(ConversationTurn {
            role,
            content: content.into(),
        });

        if let RetentionPolicy::Window { max_turns } = self.policy {
            let before = self.turns.len();
            while self.turns.len() > max_turns {
                self.turns.pop_front();
            }
            while self
                .turns
                .front()
                .is_some_and(|t| t.role == ChatRole::Assistant)
            {
                self.turns.pop_front();
            }
            let dropped = before - self.turns.len();
            if dropped > 0 {
                self.evicted += dropped;
                debug!("Evicted {} conversation turn(s)", dropped);
            }
        }
    }

    /// The last `n` turns, oldest first.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    /// Every retained turn, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<ConversationTurn> {
        self.turns.iter().cloned().collect()
    }

    /// Retained turns as chat messages.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.turns.iter().map(ChatMessage::from).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Total turns dropped by the retention window so far.
    #[must_use]
    pub fn evicted(&self) -> usize {
        self.evicted
    }

    #[must_use]
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }
}
