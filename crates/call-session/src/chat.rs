//! Client-side chat log.
//!
//! A thin append-only mirror of the room's chat: history arrives in
//! bulk with `room/init`, live messages via `chat/new-message`. The
//! coordinator stamps ids and timestamps, so the log here is never
//! reordered or mutated.

use call_protocol::{ChatMessage, ChatPayload};

/// The chat log of the joined room.
#[derive(Debug, Default)]
pub struct CallChat {
    messages: Vec<ChatMessage>,
}

impl CallChat {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one live message.
    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Append history in bulk (from `room/init`).
    pub fn add_messages_in_bulk(&mut self, messages: Vec<ChatMessage>) {
        self.messages.extend(messages);
    }

    /// The payload for an outgoing text message.
    #[must_use]
    pub fn text_payload(text: impl Into<String>) -> ChatPayload {
        ChatPayload::Text {
            message: text.into(),
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
