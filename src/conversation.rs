//! In-memory conversation: an append-only list of user/assistant messages.
//!
//! The only mutation after creation is the `is_playing` flag, and at most
//! one message carries it at a time.

use std::fmt;

use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// Creation timestamp in milliseconds, unique within one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Local>,
    pub is_playing: bool,
}

#[derive(Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
    last_stamp: i64,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message and return its id.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> MessageId {
        let created_at = Local::now();
        // Two messages in the same millisecond still get distinct ids.
        let stamp = created_at.timestamp_millis().max(self.last_stamp + 1);
        self.last_stamp = stamp;

        let id = MessageId(stamp.to_string());
        self.messages.push(Message {
            id: id.clone(),
            role,
            content: content.into(),
            created_at,
            is_playing: false,
        });
        id
    }

    /// Mark `id` as playing and every other message as not playing.
    /// Unknown ids leave the conversation untouched.
    pub fn set_playing(&mut self, id: &MessageId) {
        if !self.messages.iter().any(|m| &m.id == id) {
            return;
        }
        for message in &mut self.messages {
            message.is_playing = &message.id == id;
        }
    }

    /// Clear the playing flag on one message, or on all of them with `None`.
    pub fn clear_playing(&mut self, id: Option<&MessageId>) {
        for message in &mut self.messages {
            if id.map_or(true, |id| &message.id == id) {
                message.is_playing = false;
            }
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn playing(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_playing)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }
}
