//! Client → coordinator actions.

use serde::{Deserialize, Serialize};

use crate::chat::ChatPayload;
use crate::participant::{CameraUpdate, MicUpdate, ParticipantWire, ScreenshareUpdate};

/// An action sent by a client over its room connection.
///
/// The `action` tag carries the wire name; media updates always carry
/// the full `(enabled, trackRef)` pair for their kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ClientAction {
    /// Enter the room with the sender's current public state.
    #[serde(rename = "join")]
    Join {
        #[serde(rename = "self")]
        participant: ParticipantWire,
    },

    /// Leave the room explicitly.
    #[serde(rename = "leave")]
    Leave,

    /// Full replacement of the sender's mic state.
    #[serde(rename = "self/mic-update")]
    MicUpdate { updates: MicUpdate },

    /// Full replacement of the sender's camera state.
    #[serde(rename = "self/camera-update")]
    CameraUpdate { updates: CameraUpdate },

    /// Full replacement of the sender's screenshare state.
    #[serde(rename = "self/screenshare-update")]
    ScreenshareUpdate { updates: ScreenshareUpdate },

    /// Append a chat message; the coordinator stamps id/author/time.
    #[serde(rename = "chat/message")]
    Chat { message: ChatPayload },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_action_tags_match_wire_names() {
        let join = ClientAction::Join {
            participant: ParticipantWire::new(Uuid::new_v4(), "Ada"),
        };
        let json = serde_json::to_value(&join).unwrap();
        assert_eq!(json["action"], "join");
        assert_eq!(json["self"]["name"], "Ada");

        let mic = ClientAction::MicUpdate {
            updates: MicUpdate {
                mic_enabled: true,
                mic_track_id: Some("sess:mic".to_string()),
            },
        };
        let json = serde_json::to_value(&mic).unwrap();
        assert_eq!(json["action"], "self/mic-update");
        assert_eq!(json["updates"]["micEnabled"], true);

        let leave = serde_json::to_value(&ClientAction::Leave).unwrap();
        assert_eq!(leave["action"], "leave");
    }

    #[test]
    fn test_chat_action_round_trip() {
        let action = ClientAction::Chat {
            message: ChatPayload::Text {
                message: "hi all".to_string(),
            },
        };
        let json = serde_json::to_string(&action).unwrap();
        let back: ClientAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
