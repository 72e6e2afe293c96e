//! Serialized participant state.
//!
//! [`ParticipantWire`] is the public shape of one participant as it
//! travels in `join` actions, `room/init` rosters and `participant/joined`
//! events. Live track handles are deliberately absent: only the enabled
//! flag and the opaque track reference are serializable.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Public participant state as carried on the wire.
///
/// A track id field is present only while the matching `*Enabled` flag is
/// true; a disabled kind serializes without its id so receivers can never
/// observe a torn (disabled but referenced) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantWire {
    /// Stable participant id, generated client-side.
    pub id: Uuid,
    /// Display name.
    pub name: String,

    pub mic_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_track_id: Option<String>,

    pub camera_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_track_id: Option<String>,

    pub screenshare_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshare_video_track_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshare_audio_track_id: Option<String>,
}

impl ParticipantWire {
    /// A participant with all media disabled.
    #[must_use]
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            mic_enabled: false,
            mic_track_id: None,
            camera_enabled: false,
            camera_track_id: None,
            screenshare_enabled: false,
            screenshare_video_track_id: None,
            screenshare_audio_track_id: None,
        }
    }
}

/// Full replacement of a participant's mic state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MicUpdate {
    pub mic_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mic_track_id: Option<String>,
}

/// Full replacement of a participant's camera state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraUpdate {
    pub camera_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_track_id: Option<String>,
}

/// Full replacement of a participant's screenshare state.
///
/// Screenshare publishes a video track and, when the source carries
/// audio, an audio track; both references travel under one update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshareUpdate {
    pub screenshare_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshare_video_track_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshare_audio_track_id: Option<String>,
}

impl MicUpdate {
    /// Mic switched off; any previous track reference is dropped.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            mic_enabled: false,
            mic_track_id: None,
        }
    }
}

impl CameraUpdate {
    /// Camera switched off; any previous track reference is dropped.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            camera_enabled: false,
            camera_track_id: None,
        }
    }
}

impl ScreenshareUpdate {
    /// Screenshare switched off; previous track references are dropped.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            screenshare_enabled: false,
            screenshare_video_track_id: None,
            screenshare_audio_track_id: None,
        }
    }
}
