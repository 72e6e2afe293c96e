//! Chat message model.
//!
//! Chat is an append-only log: messages are never mutated or removed
//! once broadcast. The payload is a tagged variant so text and binary
//! (file/image) messages share one log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChatPayload {
    /// Plain text message.
    Text { message: String },
    /// Uploaded file, referenced by url.
    File { name: String, url: String, size: u64 },
    /// Uploaded image, referenced by url.
    Image { name: String, url: String, size: u64 },
}

/// One entry of a room's chat log.
///
/// `id` and `created_at` are stamped by the coordinator when the message
/// is accepted, so the log order is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    /// Participant id of the author.
    pub user_id: Uuid,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: ChatPayload,
}
