//! Coordinator → client events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::ChatMessage;
use crate::participant::{CameraUpdate, MicUpdate, ParticipantWire, ScreenshareUpdate};

/// Mic replacement for one participant, as rebroadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantMicUpdate {
    #[serde(flatten)]
    pub updates: MicUpdate,
    pub participant_id: Uuid,
}

/// Camera replacement for one participant, as rebroadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantCameraUpdate {
    #[serde(flatten)]
    pub updates: CameraUpdate,
    pub participant_id: Uuid,
}

/// Screenshare replacement for one participant, as rebroadcast to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantScreenshareUpdate {
    #[serde(flatten)]
    pub updates: ScreenshareUpdate,
    pub participant_id: Uuid,
}

/// An event delivered to a client over its room connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ServerEvent {
    /// Transport is up; the client may now `join`.
    #[serde(rename = "connected")]
    Connected,

    /// Bulk room state for a joining client: current roster (excluding
    /// the joiner), room start time and the chat history so far.
    #[serde(rename = "room/init")]
    RoomInit {
        participants: Vec<ParticipantWire>,
        started_at: DateTime<Utc>,
        #[serde(rename = "chatMessages")]
        chat_messages: Vec<ChatMessage>,
    },

    #[serde(rename = "participant/joined")]
    ParticipantJoined { participant: ParticipantWire },

    #[serde(rename = "participant/left")]
    ParticipantLeft {
        #[serde(rename = "participantId")]
        participant_id: Uuid,
    },

    #[serde(rename = "participant/mic-update")]
    ParticipantMicUpdate { data: ParticipantMicUpdate },

    #[serde(rename = "participant/camera-update")]
    ParticipantCameraUpdate { data: ParticipantCameraUpdate },

    #[serde(rename = "participant/screenshare-update")]
    ParticipantScreenshareUpdate { data: ParticipantScreenshareUpdate },

    #[serde(rename = "chat/new-message")]
    ChatNewMessage { message: ChatMessage },
}
