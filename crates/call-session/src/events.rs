//! Typed session event bus.
//!
//! Session state changes are published as one tagged event type,
//! [`SessionEvent`], through a pub/sub registry that supports both a
//! narrow per-kind subscription and a broad subscribe-to-everything
//! channel. Events carry consistent snapshots: a media update is
//! published only after the full per-kind state has been applied, so a
//! subscriber can never observe a transient half-updated pair.

use std::collections::HashMap;

use call_protocol::ChatMessage;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::media::MediaTrack;
use crate::participant::ParticipantSnapshot;

/// Default per-channel buffer for event subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A session state change, published on the event bus.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Signaling transport is up; `join()` is now valid.
    Connected,
    /// Bulk room state applied; the session is in the room.
    Joined,
    /// The session left the room (terminal).
    Left,

    /// A participant entered the roster.
    ParticipantAdded { participant: ParticipantSnapshot },
    /// A participant's public state changed.
    ParticipantUpdated { participant: ParticipantSnapshot },
    /// A participant left the roster.
    ParticipantRemoved { participant: ParticipantSnapshot },

    /// A participant was granted a stage slot.
    StageAdded { participant_id: Uuid },
    /// A participant lost its stage slot.
    StageRemoved { participant_id: Uuid },
    /// The stage membership changed; carries the new ordered stage.
    StageUpdated { stage: Vec<Uuid> },

    /// A participant's mic state resolved (or was disabled).
    MicUpdate {
        participant_id: Uuid,
        enabled: bool,
        track: Option<MediaTrack>,
    },
    /// A participant's camera state resolved (or was disabled).
    CameraUpdate {
        participant_id: Uuid,
        enabled: bool,
        track: Option<MediaTrack>,
    },
    /// A participant's screenshare state resolved (or was disabled).
    ScreenshareUpdate {
        participant_id: Uuid,
        enabled: bool,
        video_track: Option<MediaTrack>,
        audio_track: Option<MediaTrack>,
    },

    /// A participant's coarse volume level changed (0-10).
    VolumeChanged { participant_id: Uuid, level: u8 },

    /// The local participant's public state changed.
    SelfUpdated { participant: ParticipantSnapshot },

    /// Chat history loaded in bulk from `room/init`.
    ChatLoaded { messages: Vec<ChatMessage> },
    /// A new chat message arrived.
    ChatMessage { message: ChatMessage },

    /// A transport or media failure surfaced to the consumer.
    Error { message: String },
}

/// Discriminant for narrow event subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionEventKind {
    Connected,
    Joined,
    Left,
    ParticipantAdded,
    ParticipantUpdated,
    ParticipantRemoved,
    StageAdded,
    StageRemoved,
    StageUpdated,
    MicUpdate,
    CameraUpdate,
    ScreenshareUpdate,
    VolumeChanged,
    SelfUpdated,
    ChatLoaded,
    ChatMessage,
    Error,
}

/// Every subscribable kind, used to pre-build the per-kind channels.
const ALL_KINDS: [SessionEventKind; 17] = [
    SessionEventKind::Connected,
    SessionEventKind::Joined,
    SessionEventKind::Left,
    SessionEventKind::ParticipantAdded,
    SessionEventKind::ParticipantUpdated,
    SessionEventKind::ParticipantRemoved,
    SessionEventKind::StageAdded,
    SessionEventKind::StageRemoved,
    SessionEventKind::StageUpdated,
    SessionEventKind::MicUpdate,
    SessionEventKind::CameraUpdate,
    SessionEventKind::ScreenshareUpdate,
    SessionEventKind::VolumeChanged,
    SessionEventKind::SelfUpdated,
    SessionEventKind::ChatLoaded,
    SessionEventKind::ChatMessage,
    SessionEventKind::Error,
];

impl SessionEvent {
    /// The subscription kind of this event.
    #[must_use]
    pub fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::Connected => SessionEventKind::Connected,
            SessionEvent::Joined => SessionEventKind::Joined,
            SessionEvent::Left => SessionEventKind::Left,
            SessionEvent::ParticipantAdded { .. } => SessionEventKind::ParticipantAdded,
            SessionEvent::ParticipantUpdated { .. } => SessionEventKind::ParticipantUpdated,
            SessionEvent::ParticipantRemoved { .. } => SessionEventKind::ParticipantRemoved,
            SessionEvent::StageAdded { .. } => SessionEventKind::StageAdded,
            SessionEvent::StageRemoved { .. } => SessionEventKind::StageRemoved,
            SessionEvent::StageUpdated { .. } => SessionEventKind::StageUpdated,
            SessionEvent::MicUpdate { .. } => SessionEventKind::MicUpdate,
            SessionEvent::CameraUpdate { .. } => SessionEventKind::CameraUpdate,
            SessionEvent::ScreenshareUpdate { .. } => SessionEventKind::ScreenshareUpdate,
            SessionEvent::VolumeChanged { .. } => SessionEventKind::VolumeChanged,
            SessionEvent::SelfUpdated { .. } => SessionEventKind::SelfUpdated,
            SessionEvent::ChatLoaded { .. } => SessionEventKind::ChatLoaded,
            SessionEvent::ChatMessage { .. } => SessionEventKind::ChatMessage,
            SessionEvent::Error { .. } => SessionEventKind::Error,
        }
    }
}

/// Pub/sub registry for session events.
///
/// Emitting is non-blocking and never fails: events published while no
/// subscriber is listening are simply dropped.
#[derive(Debug)]
pub struct EventBus {
    all: broadcast::Sender<SessionEvent>,
    by_kind: HashMap<SessionEventKind, broadcast::Sender<SessionEvent>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (all, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let by_kind = ALL_KINDS
            .into_iter()
            .map(|kind| (kind, broadcast::channel(EVENT_CHANNEL_CAPACITY).0))
            .collect();
        Self { all, by_kind }
    }

    /// Publish an event to its kind channel and the broad channel.
    pub fn emit(&self, event: SessionEvent) {
        if let Some(sender) = self.by_kind.get(&event.kind()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event);
    }

    /// Subscribe to one event kind.
    #[must_use]
    pub fn subscribe(&self, kind: SessionEventKind) -> broadcast::Receiver<SessionEvent> {
        self.by_kind.get(&kind).map_or_else(
            // Unreachable: every kind is pre-registered in `new`.
            || self.all.subscribe(),
            broadcast::Sender::subscribe,
        )
    }

    /// Subscribe to every event.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<SessionEvent> {
        self.all.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
