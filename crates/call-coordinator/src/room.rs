//! `RoomActor` - per-room actor that owns the authoritative room state.
//!
//! Each `RoomActor`:
//! - Owns the roster (join-ordered participant records) and chat log
//! - Applies client actions and rebroadcasts events to the room
//! - Persists state on every mutation so a restart can reload it
//! - Clears storage after the room stays empty past a grace delay
//!
//! # Empty-room handling
//!
//! When the last connection drops the grace timer starts; a reconnect
//! within the window cancels it. Once it expires, storage is cleared
//! and the actor shuts down. Restored records (loaded from storage
//! after a restart) carry no connection and are swept the same way if
//! their owners do not rejoin.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use call_protocol::event::{
    ParticipantCameraUpdate, ParticipantMicUpdate, ParticipantScreenshareUpdate,
};
use call_protocol::{ChatMessage, ChatPayload, ClientAction, ParticipantWire, ServerEvent};
use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::CoordinatorError;
use crate::storage::RoomStorage;

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 256;

/// Interval at which the empty-room grace timer is checked.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Identifier of one signaling connection.
pub type ConnectionId = Uuid;

/// Messages sent to a `RoomActor`.
#[derive(Debug)]
enum RoomMessage {
    /// A new connection attached to this room.
    Connect {
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerEvent>,
        respond_to: oneshot::Sender<()>,
    },

    /// An action arrived on a connection.
    Action {
        connection_id: ConnectionId,
        action: ClientAction,
    },

    /// A connection closed (socket gone, not an explicit leave).
    Disconnect { connection_id: ConnectionId },

    /// Get current room state (for debugging/tests).
    GetState { respond_to: oneshot::Sender<RoomState> },
}

/// Current state of a room.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room_id: String,
    pub participants: Vec<ParticipantWire>,
    pub chat_len: usize,
    pub connection_count: usize,
    pub started_at: DateTime<Utc>,
}

/// Handle to a `RoomActor`.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl RoomHandle {
    /// Get the room id.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Attach a connection; the room immediately sends `connected`.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor is gone.
    pub async fn connect(
        &self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerEvent>,
    ) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Connect {
                connection_id,
                sender,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::RoomClosed)?;
        rx.await.map_err(|_| CoordinatorError::RoomClosed)
    }

    /// Apply a client action; fire-and-forget, no ack awaited.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor is gone.
    pub async fn action(
        &self,
        connection_id: ConnectionId,
        action: ClientAction,
    ) -> Result<(), CoordinatorError> {
        self.sender
            .send(RoomMessage::Action {
                connection_id,
                action,
            })
            .await
            .map_err(|_| CoordinatorError::RoomClosed)
    }

    /// Notify of a closed connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor is gone.
    pub async fn disconnect(&self, connection_id: ConnectionId) -> Result<(), CoordinatorError> {
        self.sender
            .send(RoomMessage::Disconnect { connection_id })
            .await
            .map_err(|_| CoordinatorError::RoomClosed)
    }

    /// Get current room state.
    ///
    /// # Errors
    ///
    /// Returns an error if the room actor is gone.
    pub async fn state(&self) -> Result<RoomState, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::GetState { respond_to: tx })
            .await
            .map_err(|_| CoordinatorError::RoomClosed)?;
        rx.await.map_err(|_| CoordinatorError::RoomClosed)
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One roster entry; the connection is server-only and never leaves the
/// process.
#[derive(Debug)]
struct ParticipantRecord {
    wire: ParticipantWire,
    connection: Option<ConnectionId>,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    storage: Arc<dyn RoomStorage>,
    connections: HashMap<ConnectionId, mpsc::Sender<ServerEvent>>,
    /// Join order preserved for fairness.
    roster: Vec<ParticipantRecord>,
    chat: Vec<ChatMessage>,
    started_at: DateTime<Utc>,
    empty_grace: Duration,
    empty_since: Option<Instant>,
}

impl RoomActor {
    /// Spawn a room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: impl Into<String>,
        storage: Arc<dyn RoomStorage>,
        empty_grace: Duration,
        cancel_token: CancellationToken,
    ) -> (RoomHandle, JoinHandle<()>) {
        let room_id = room_id.into();
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            storage,
            connections: HashMap::new(),
            roster: Vec::new(),
            chat: Vec::new(),
            started_at: Utc::now(),
            empty_grace,
            empty_since: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "call.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        self.load_persisted_state().await;
        self.update_empty_state();

        info!(
            target: "call.room",
            room_id = %self.room_id,
            restored_participants = self.roster.len(),
            restored_messages = self.chat.len(),
            "RoomActor started"
        );

        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "call.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                _ = sweep.tick() => {
                    if self.sweep_if_expired().await {
                        break;
                    }
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "call.room",
            room_id = %self.room_id,
            participants = self.roster.len(),
            "RoomActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Connect {
                connection_id,
                sender,
                respond_to,
            } => {
                self.handle_connect(connection_id, sender).await;
                let _ = respond_to.send(());
            }

            RoomMessage::Action {
                connection_id,
                action,
            } => self.handle_action(connection_id, action).await,

            RoomMessage::Disconnect { connection_id } => {
                self.handle_disconnect(connection_id).await;
            }

            RoomMessage::GetState { respond_to } => {
                let state = RoomState {
                    room_id: self.room_id.clone(),
                    participants: self.roster.iter().map(|r| r.wire.clone()).collect(),
                    chat_len: self.chat.len(),
                    connection_count: self.connections.len(),
                    started_at: self.started_at,
                };
                let _ = respond_to.send(state);
            }
        }
    }

    async fn handle_connect(
        &mut self,
        connection_id: ConnectionId,
        sender: mpsc::Sender<ServerEvent>,
    ) {
        debug!(
            target: "call.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            "Connection attached"
        );
        let _ = sender.send(ServerEvent::Connected).await;
        self.connections.insert(connection_id, sender);
        self.update_empty_state();
    }

    async fn handle_action(&mut self, connection_id: ConnectionId, action: ClientAction) {
        match action {
            ClientAction::Join { participant } => {
                self.handle_join(connection_id, participant).await;
            }

            ClientAction::Leave => {
                self.handle_leave(connection_id).await;
            }

            ClientAction::MicUpdate { updates } => {
                let Some(participant_id) = self.apply_to_sender(connection_id, |wire| {
                    wire.mic_enabled = updates.mic_enabled;
                    wire.mic_track_id = updates.mic_track_id.clone();
                }) else {
                    return;
                };
                self.persist_roster().await;
                self.broadcast(
                    &ServerEvent::ParticipantMicUpdate {
                        data: ParticipantMicUpdate {
                            updates,
                            participant_id,
                        },
                    },
                    Some(connection_id),
                )
                .await;
            }

            ClientAction::CameraUpdate { updates } => {
                let Some(participant_id) = self.apply_to_sender(connection_id, |wire| {
                    wire.camera_enabled = updates.camera_enabled;
                    wire.camera_track_id = updates.camera_track_id.clone();
                }) else {
                    return;
                };
                self.persist_roster().await;
                self.broadcast(
                    &ServerEvent::ParticipantCameraUpdate {
                        data: ParticipantCameraUpdate {
                            updates,
                            participant_id,
                        },
                    },
                    Some(connection_id),
                )
                .await;
            }

            ClientAction::ScreenshareUpdate { updates } => {
                let Some(participant_id) = self.apply_to_sender(connection_id, |wire| {
                    wire.screenshare_enabled = updates.screenshare_enabled;
                    wire.screenshare_video_track_id = updates.screenshare_video_track_id.clone();
                    wire.screenshare_audio_track_id = updates.screenshare_audio_track_id.clone();
                }) else {
                    return;
                };
                self.persist_roster().await;
                self.broadcast(
                    &ServerEvent::ParticipantScreenshareUpdate {
                        data: ParticipantScreenshareUpdate {
                            updates,
                            participant_id,
                        },
                    },
                    Some(connection_id),
                )
                .await;
            }

            ClientAction::Chat { message } => {
                self.handle_chat(connection_id, message).await;
            }
        }
    }

    /// Apply a full per-kind replacement to the sender's record.
    ///
    /// Unknown senders (updates arriving before `join` or after
    /// `leave`) are ignored.
    fn apply_to_sender(
        &mut self,
        connection_id: ConnectionId,
        apply: impl FnOnce(&mut ParticipantWire),
    ) -> Option<Uuid> {
        let record = self
            .roster
            .iter_mut()
            .find(|record| record.connection == Some(connection_id))?;
        apply(&mut record.wire);
        Some(record.wire.id)
    }

    #[instrument(skip_all, fields(room_id = %self.room_id))]
    async fn handle_join(&mut self, connection_id: ConnectionId, participant: ParticipantWire) {
        // The joiner gets the room as it was before it entered.
        let existing: Vec<ParticipantWire> = self
            .roster
            .iter()
            .filter(|record| record.wire.id != participant.id)
            .map(|record| record.wire.clone())
            .collect();
        if let Some(sender) = self.connections.get(&connection_id) {
            let _ = sender
                .send(ServerEvent::RoomInit {
                    participants: existing,
                    started_at: self.started_at,
                    chat_messages: self.chat.clone(),
                })
                .await;
        }

        // Upsert keeps the original join position on duplicate joins.
        if let Some(record) = self
            .roster
            .iter_mut()
            .find(|record| record.wire.id == participant.id)
        {
            record.wire = participant.clone();
            record.connection = Some(connection_id);
        } else {
            self.roster.push(ParticipantRecord {
                wire: participant.clone(),
                connection: Some(connection_id),
            });
        }
        self.persist_roster().await;

        self.broadcast(
            &ServerEvent::ParticipantJoined { participant },
            Some(connection_id),
        )
        .await;

        info!(
            target: "call.room",
            total_participants = self.roster.len(),
            "Participant joined"
        );
    }

    async fn handle_leave(&mut self, connection_id: ConnectionId) {
        let Some(position) = self
            .roster
            .iter()
            .position(|record| record.connection == Some(connection_id))
        else {
            return;
        };
        let record = self.roster.remove(position);
        self.persist_roster().await;
        self.broadcast(
            &ServerEvent::ParticipantLeft {
                participant_id: record.wire.id,
            },
            Some(connection_id),
        )
        .await;

        info!(
            target: "call.room",
            room_id = %self.room_id,
            remaining_participants = self.roster.len(),
            "Participant left"
        );
    }

    async fn handle_disconnect(&mut self, connection_id: ConnectionId) {
        self.connections.remove(&connection_id);

        if let Some(position) = self
            .roster
            .iter()
            .position(|record| record.connection == Some(connection_id))
        {
            let record = self.roster.remove(position);
            self.persist_roster().await;
            self.broadcast(
                &ServerEvent::ParticipantLeft {
                    participant_id: record.wire.id,
                },
                None,
            )
            .await;
            info!(
                target: "call.room",
                room_id = %self.room_id,
                remaining_participants = self.roster.len(),
                "Participant connection closed"
            );
        }

        self.update_empty_state();
    }

    /// Stamp, append, persist and broadcast a chat message. The sender
    /// receives its own message back; the log order is authoritative.
    async fn handle_chat(&mut self, connection_id: ConnectionId, payload: ChatPayload) {
        let Some(record) = self
            .roster
            .iter()
            .find(|record| record.connection == Some(connection_id))
        else {
            warn!(
                target: "call.room",
                room_id = %self.room_id,
                "Chat message from connection without a roster entry ignored"
            );
            return;
        };

        let message = ChatMessage {
            id: Uuid::new_v4(),
            user_id: record.wire.id,
            display_name: record.wire.name.clone(),
            created_at: Utc::now(),
            payload,
        };
        self.chat.push(message.clone());
        self.persist_chat().await;
        self.broadcast(&ServerEvent::ChatNewMessage { message }, None)
            .await;
    }

    /// Broadcast an event to every connection except `exclude`.
    async fn broadcast(&self, event: &ServerEvent, exclude: Option<ConnectionId>) {
        for (connection_id, sender) in &self.connections {
            if Some(*connection_id) == exclude {
                continue;
            }
            let _ = sender.send(event.clone()).await;
        }
    }

    fn update_empty_state(&mut self) {
        if self.connections.is_empty() {
            if self.empty_since.is_none() {
                debug!(
                    target: "call.room",
                    room_id = %self.room_id,
                    grace_seconds = self.empty_grace.as_secs(),
                    "Room empty, grace timer started"
                );
                self.empty_since = Some(Instant::now());
            }
        } else {
            self.empty_since = None;
        }
    }

    /// Clear storage and shut down once the empty grace delay expires.
    async fn sweep_if_expired(&mut self) -> bool {
        let Some(since) = self.empty_since else {
            return false;
        };
        if since.elapsed() < self.empty_grace {
            return false;
        }

        info!(
            target: "call.room",
            room_id = %self.room_id,
            "Empty grace expired, clearing room storage"
        );
        for suffix in ["meta", "roster", "chat"] {
            if let Err(error) = self.storage.delete(&self.key(suffix)).await {
                warn!(
                    target: "call.room",
                    room_id = %self.room_id,
                    error = %error,
                    "Failed to clear room storage"
                );
            }
        }
        self.roster.clear();
        self.chat.clear();
        self.cancel_token.cancel();
        true
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.room_id)
    }

    async fn load_persisted_state(&mut self) {
        match self.storage.get(&self.key("meta")).await {
            Ok(Some(value)) => {
                if let Some(started_at) = value
                    .get("started_at")
                    .and_then(|v| serde_json::from_value::<DateTime<Utc>>(v.clone()).ok())
                {
                    self.started_at = started_at;
                }
            }
            Ok(None) => {
                self.persist_meta().await;
            }
            Err(error) => {
                warn!(
                    target: "call.room",
                    room_id = %self.room_id,
                    error = %error,
                    "Failed to load room meta"
                );
            }
        }

        // Restored records have no live connection yet; their owners
        // either rejoin or the grace sweep collects them.
        match self.storage.get(&self.key("roster")).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<ParticipantWire>>(value) {
                Ok(wires) => {
                    self.roster = wires
                        .into_iter()
                        .map(|wire| ParticipantRecord {
                            wire,
                            connection: None,
                        })
                        .collect();
                }
                Err(error) => {
                    warn!(
                        target: "call.room",
                        room_id = %self.room_id,
                        error = %error,
                        "Corrupt persisted roster discarded"
                    );
                }
            },
            Ok(None) => {}
            Err(error) => {
                warn!(
                    target: "call.room",
                    room_id = %self.room_id,
                    error = %error,
                    "Failed to load room roster"
                );
            }
        }

        match self.storage.get(&self.key("chat")).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<ChatMessage>>(value) {
                Ok(messages) => self.chat = messages,
                Err(error) => {
                    warn!(
                        target: "call.room",
                        room_id = %self.room_id,
                        error = %error,
                        "Corrupt persisted chat discarded"
                    );
                }
            },
            Ok(None) => {}
            Err(error) => {
                warn!(
                    target: "call.room",
                    room_id = %self.room_id,
                    error = %error,
                    "Failed to load room chat"
                );
            }
        }
    }

    async fn persist_meta(&self) {
        let value = json!({ "started_at": self.started_at });
        if let Err(error) = self.storage.put(&self.key("meta"), value).await {
            warn!(
                target: "call.room",
                room_id = %self.room_id,
                error = %error,
                "Failed to persist room meta"
            );
        }
    }

    async fn persist_roster(&self) {
        let wires: Vec<&ParticipantWire> = self.roster.iter().map(|record| &record.wire).collect();
        match serde_json::to_value(&wires) {
            Ok(value) => {
                if let Err(error) = self.storage.put(&self.key("roster"), value).await {
                    warn!(
                        target: "call.room",
                        room_id = %self.room_id,
                        error = %error,
                        "Failed to persist roster"
                    );
                }
            }
            Err(error) => {
                warn!(
                    target: "call.room",
                    room_id = %self.room_id,
                    error = %error,
                    "Failed to serialize roster"
                );
            }
        }
    }

    async fn persist_chat(&self) {
        match serde_json::to_value(&self.chat) {
            Ok(value) => {
                if let Err(error) = self.storage.put(&self.key("chat"), value).await {
                    warn!(
                        target: "call.room",
                        room_id = %self.room_id,
                        error = %error,
                        "Failed to persist chat"
                    );
                }
            }
            Err(error) => {
                warn!(
                    target: "call.room",
                    room_id = %self.room_id,
                    error = %error,
                    "Failed to serialize chat"
                );
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use call_protocol::MicUpdate;

    const GRACE: Duration = Duration::from_secs(10);

    fn spawn_room(storage: Arc<dyn RoomStorage>) -> (RoomHandle, JoinHandle<()>) {
        RoomActor::spawn("room-1", storage, GRACE, CancellationToken::new())
    }

    async fn attach(room: &RoomHandle) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(32);
        room.connect(connection_id, tx).await.unwrap();
        // Every connection is greeted first.
        assert!(matches!(rx.recv().await.unwrap(), ServerEvent::Connected));
        (connection_id, rx)
    }

    fn wire(name: &str) -> ParticipantWire {
        ParticipantWire::new(Uuid::new_v4(), name)
    }

    async fn join(room: &RoomHandle, connection_id: ConnectionId, participant: ParticipantWire) {
        room.action(
            connection_id,
            ClientAction::Join { participant },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_join_inits_joiner_and_notifies_others() {
        let storage = Arc::new(MemoryStorage::new());
        let (room, _task) = spawn_room(storage);

        let (conn_a, mut rx_a) = attach(&room).await;
        let alice = wire("alice");
        join(&room, conn_a, alice.clone()).await;

        // The joiner gets the room as it was before joining: empty.
        let event = rx_a.recv().await.unwrap();
        let ServerEvent::RoomInit { participants, .. } = event else {
            panic!("expected room/init, got {event:?}");
        };
        assert!(participants.is_empty());

        let (conn_b, mut rx_b) = attach(&room).await;
        let bob = wire("bob");
        join(&room, conn_b, bob.clone()).await;

        // Bob's init carries alice; alice hears about bob.
        let event = rx_b.recv().await.unwrap();
        let ServerEvent::RoomInit { participants, .. } = event else {
            panic!("expected room/init, got {event:?}");
        };
        assert_eq!(participants.len(), 1);
        assert_eq!(participants.first().unwrap().id, alice.id);

        let event = rx_a.recv().await.unwrap();
        assert!(matches!(
            event,
            ServerEvent::ParticipantJoined { participant } if participant.id == bob.id
        ));

        let state = room.state().await.unwrap();
        assert_eq!(state.participants.len(), 2);
        assert_eq!(state.connection_count, 2);
    }

    #[tokio::test]
    async fn test_media_update_is_full_replacement_excluding_sender() {
        let storage = Arc::new(MemoryStorage::new());
        let (room, _task) = spawn_room(storage);

        let (conn_a, mut rx_a) = attach(&room).await;
        let alice = wire("alice");
        join(&room, conn_a, alice.clone()).await;
        let _ = rx_a.recv().await; // room/init

        let (conn_b, mut rx_b) = attach(&room).await;
        join(&room, conn_b, wire("bob")).await;
        let _ = rx_b.recv().await; // room/init
        let _ = rx_a.recv().await; // participant/joined

        room.action(
            conn_a,
            ClientAction::MicUpdate {
                updates: MicUpdate {
                    mic_enabled: true,
                    mic_track_id: Some("s:mic".to_string()),
                },
            },
        )
        .await
        .unwrap();

        let event = rx_b.recv().await.unwrap();
        let ServerEvent::ParticipantMicUpdate { data } = event else {
            panic!("expected mic-update, got {event:?}");
        };
        assert_eq!(data.participant_id, alice.id);
        assert!(data.updates.mic_enabled);

        // The sender does not hear its own update echoed back.
        assert!(rx_a.try_recv().is_err());

        // Disable replaces the whole pair.
        room.action(
            conn_a,
            ClientAction::MicUpdate {
                updates: MicUpdate::disabled(),
            },
        )
        .await
        .unwrap();
        let event = rx_b.recv().await.unwrap();
        let ServerEvent::ParticipantMicUpdate { data } = event else {
            panic!("expected mic-update, got {event:?}");
        };
        assert!(!data.updates.mic_enabled);
        assert!(data.updates.mic_track_id.is_none());

        let state = room.state().await.unwrap();
        let record = state
            .participants
            .iter()
            .find(|p| p.id == alice.id)
            .unwrap();
        assert!(!record.mic_enabled);
        assert!(record.mic_track_id.is_none());
    }

    #[tokio::test]
    async fn test_update_before_join_is_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let (room, _task) = spawn_room(storage);
        let (conn_a, _rx_a) = attach(&room).await;

        room.action(
            conn_a,
            ClientAction::MicUpdate {
                updates: MicUpdate {
                    mic_enabled: true,
                    mic_track_id: Some("s:mic".to_string()),
                },
            },
        )
        .await
        .unwrap();

        let state = room.state().await.unwrap();
        assert!(state.participants.is_empty());
    }

    #[tokio::test]
    async fn test_chat_is_stamped_broadcast_to_all_and_persisted() {
        let storage = Arc::new(MemoryStorage::new());
        let (room, _task) = spawn_room(Arc::clone(&storage) as Arc<dyn RoomStorage>);

        let (conn_a, mut rx_a) = attach(&room).await;
        let alice = wire("alice");
        join(&room, conn_a, alice.clone()).await;
        let _ = rx_a.recv().await; // room/init

        room.action(
            conn_a,
            ClientAction::Chat {
                message: ChatPayload::Text {
                    message: "hello room".to_string(),
                },
            },
        )
        .await
        .unwrap();

        // The author receives its own stamped message back.
        let event = rx_a.recv().await.unwrap();
        let ServerEvent::ChatNewMessage { message } = event else {
            panic!("expected chat/new-message, got {event:?}");
        };
        assert_eq!(message.user_id, alice.id);
        assert_eq!(message.display_name, "alice");

        let persisted = storage.get("room-1:chat").await.unwrap().unwrap();
        let log: Vec<ChatMessage> = serde_json::from_value(persisted).unwrap();
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_and_disconnect_broadcast_left() {
        let storage = Arc::new(MemoryStorage::new());
        let (room, _task) = spawn_room(storage);

        let (conn_a, mut rx_a) = attach(&room).await;
        let alice = wire("alice");
        join(&room, conn_a, alice.clone()).await;
        let _ = rx_a.recv().await;

        let (conn_b, mut rx_b) = attach(&room).await;
        let bob = wire("bob");
        join(&room, conn_b, bob.clone()).await;
        let _ = rx_b.recv().await;
        let _ = rx_a.recv().await;

        // Explicit leave.
        room.action(conn_a, ClientAction::Leave).await.unwrap();
        let event = rx_b.recv().await.unwrap();
        assert!(matches!(
            event,
            ServerEvent::ParticipantLeft { participant_id } if participant_id == alice.id
        ));

        // Socket close without a leave action.
        room.disconnect(conn_b).await.unwrap();
        let state = room.state().await.unwrap();
        assert!(state.participants.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_room_cleared_after_grace() {
        let storage = Arc::new(MemoryStorage::new());
        let (room, _task) = spawn_room(Arc::clone(&storage) as Arc<dyn RoomStorage>);

        let (conn_a, mut rx_a) = attach(&room).await;
        join(&room, conn_a, wire("alice")).await;
        let _ = rx_a.recv().await;
        room.action(
            conn_a,
            ClientAction::Chat {
                message: ChatPayload::Text {
                    message: "hi".to_string(),
                },
            },
        )
        .await
        .unwrap();
        let _ = rx_a.recv().await;
        assert!(storage.get("room-1:chat").await.unwrap().is_some());

        room.disconnect(conn_a).await.unwrap();

        // Just inside the grace window: state survives.
        tokio::time::advance(GRACE - Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(storage.get("room-1:chat").await.unwrap().is_some());
        assert!(!room.is_cancelled());

        // Past the window: storage cleared, room shut down.
        tokio::time::advance(Duration::from_secs(3)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(storage.get("room-1:chat").await.unwrap().is_none());
        assert!(storage.get("room-1:roster").await.unwrap().is_none());
        assert!(room.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_within_grace_cancels_sweep() {
        let storage = Arc::new(MemoryStorage::new());
        let (room, _task) = spawn_room(Arc::clone(&storage) as Arc<dyn RoomStorage>);

        let (conn_a, mut rx_a) = attach(&room).await;
        let alice = wire("alice");
        join(&room, conn_a, alice.clone()).await;
        let _ = rx_a.recv().await;
        room.action(
            conn_a,
            ClientAction::Chat {
                message: ChatPayload::Text {
                    message: "still here".to_string(),
                },
            },
        )
        .await
        .unwrap();
        let _ = rx_a.recv().await;

        room.disconnect(conn_a).await.unwrap();
        tokio::time::advance(GRACE / 2).await;

        // Rapid reconnect: history must survive well past the original
        // deadline.
        let (conn_b, mut rx_b) = attach(&room).await;
        join(&room, conn_b, alice).await;
        let event = rx_b.recv().await.unwrap();
        let ServerEvent::RoomInit { chat_messages, .. } = event else {
            panic!("expected room/init, got {event:?}");
        };
        assert_eq!(chat_messages.len(), 1);

        tokio::time::advance(GRACE * 2).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!room.is_cancelled());
        assert!(storage.get("room-1:chat").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_restart_reloads_persisted_state() {
        let storage = Arc::new(MemoryStorage::new());
        let (room, task) = spawn_room(Arc::clone(&storage) as Arc<dyn RoomStorage>);

        let (conn_a, mut rx_a) = attach(&room).await;
        let alice = wire("alice");
        join(&room, conn_a, alice.clone()).await;
        let _ = rx_a.recv().await;
        room.action(
            conn_a,
            ClientAction::Chat {
                message: ChatPayload::Text {
                    message: "before the crash".to_string(),
                },
            },
        )
        .await
        .unwrap();
        let _ = rx_a.recv().await;
        let started_at = room.state().await.unwrap().started_at;

        // Crash: no leave, no disconnect, no sweep.
        room.cancel();
        let _ = task.await;

        let (room, _task) = spawn_room(Arc::clone(&storage) as Arc<dyn RoomStorage>);
        let state = room.state().await.unwrap();
        assert_eq!(state.participants.len(), 1);
        assert_eq!(state.participants.first().unwrap().id, alice.id);
        assert_eq!(state.chat_len, 1);
        assert_eq!(state.started_at, started_at);

        // A new joiner sees the restored roster and history.
        let (conn_b, mut rx_b) = attach(&room).await;
        join(&room, conn_b, wire("bob")).await;
        let event = rx_b.recv().await.unwrap();
        let ServerEvent::RoomInit {
            participants,
            chat_messages,
            ..
        } = event
        else {
            panic!("expected room/init, got {event:?}");
        };
        assert_eq!(participants.len(), 1);
        assert_eq!(chat_messages.len(), 1);
    }
}
