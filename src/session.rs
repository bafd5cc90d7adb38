use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// who said it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// one message in the transcript. immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// session-scoped transcript, oldest first.
///
/// created empty when the session starts, emptied by `clear`, dropped with
/// the session. only one turn mutates it at a time, so there is no locking.
#[derive(Resource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// adds to the end. no dedup, no cap.
    pub fn append(&mut self, turn: ChatTurn) {
        debug!(target: "bevy_llm_chat", "history append: role={} len={}", turn.role.as_str(), turn.content.len());
        self.turns.push(turn);
    }

    pub fn clear(&mut self) {
        info!(target: "bevy_llm_chat", "history cleared ({} turns dropped)", self.turns.len());
        self.turns.clear();
    }

    /// read-only snapshot for rendering.
    pub fn all(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&ChatTurn> {
        self.turns.last()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
