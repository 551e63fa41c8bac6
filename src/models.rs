use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl ToString) -> Self {
        Self {
            role: Role::User,
            text: text.to_string(),
        }
    }

    pub fn assistant(text: impl ToString) -> Self {
        Self {
            role: Role::Assistant,
            text: text.to_string(),
        }
    }
}

/// The in-memory record of one chat session.
///
/// Turns are only ever appended, in the order they happened, and every
/// assistant turn answers the user turn right before it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// True when the last turn is a prompt that has not been answered yet.
    pub fn awaiting_reply(&self) -> bool {
        matches!(self.turns.last(), Some(turn) if turn.role == Role::User)
    }

    pub fn push_user(&mut self, text: impl ToString) -> anyhow::Result<()> {
        if self.awaiting_reply() {
            anyhow::bail!("the previous prompt has not been answered yet");
        }
        self.turns.push(Turn::user(text));
        Ok(())
    }

    pub fn push_assistant(&mut self, text: impl ToString) -> anyhow::Result<()> {
        if !self.awaiting_reply() {
            anyhow::bail!("an assistant turn needs an unanswered prompt before it");
        }
        self.turns.push(Turn::assistant(text));
        Ok(())
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
}

impl GenerateRequest {
    pub fn new(model: impl ToString, prompt: impl ToString, stream: bool) -> Self {
        Self {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream,
        }
    }
}

/// A full `/api/generate` reply, or one line of a streamed one.
///
/// Only the final line of a stream carries the timing fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Nanoseconds spent on the whole request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_count: Option<u64>,
    /// Nanoseconds spent generating `eval_count` tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_duration: Option<u64>,
}

/// Body of `GET /api/tags`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<TagModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagModel {
    pub name: String,
}

impl TagsResponse {
    pub fn names(self) -> Vec<String> {
        self.models.into_iter().map(|m| m.name).collect()
    }
}
