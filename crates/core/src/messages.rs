//! Role-tagged chat messages and the persisted turn history.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who authored a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single `{role, content}` message as sent to a language agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// The append-only message log replayed to the agent on every turn.
///
/// Ephemeral directives are never pushed here. Callers that need extra
/// messages for a single generation call build the prompt with
/// [`TurnHistory::compose`], which leaves the stored log untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnHistory {
    messages: Vec<ChatMessage>,
}

impl TurnHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Returns the stored history followed by `tail`, for one agent call.
    pub fn compose<I>(&self, tail: I) -> Vec<ChatMessage>
    where
        I: IntoIterator<Item = ChatMessage>,
    {
        self.messages.iter().cloned().chain(tail).collect()
    }

    /// Whether any stored message carries exactly this content.
    pub fn contains_content(&self, content: &str) -> bool {
        self.messages.iter().any(|m| m.content == content)
    }
}
