//! `CallSession` - the top-level session state machine.
//!
//! One actor task per call session owns the local participant, the
//! remote roster, the stage selector and the chat log. A cloneable
//! [`CallSessionHandle`] exposes the public API via message passing;
//! all session state is mutated exclusively by the actor loop, which
//! selects over the command mailbox, inbound signaling events,
//! completed media operations and the two periodic tickers.
//!
//! # State machine
//!
//! `Unconnected -> Connected -> Joined -> Left` (terminal). `join()` is
//! valid only from `Connected` and is a silent no-op elsewhere, which
//! tolerates UI double-invocation.

use std::sync::Arc;

use call_protocol::{ChatMessage, ChatPayload, ClientAction, ServerEvent};
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::chat::CallChat;
use crate::config::CallConfig;
use crate::errors::SessionError;
use crate::events::{EventBus, SessionEvent, SessionEventKind};
use crate::local::{LocalParticipant, PushSpec, ScreensharePushSpec};
use crate::media::{
    CaptureSource, DeviceInfo, EncodingOptions, MediaKind, MediaTrack, MediaTransport,
    MediaTransportError, PullOptions, TrackRef,
};
use crate::participant::{ParticipantSnapshot, PullSpec, RemoteParticipant, SlotOutcome};
use crate::registry::{ParticipantRegistry, RegistryChange};
use crate::stage::{StageChange, StageSelector};
use crate::volume::VolumeEstimator;

/// Default command mailbox buffer.
const COMMAND_CHANNEL_BUFFER: usize = 64;

/// Buffer for completed media operations reporting back to the actor.
const MEDIA_CHANNEL_BUFFER: usize = 256;

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport not yet up.
    Unconnected,
    /// Transport up; `join()` is valid.
    Connected,
    /// In the room, roster synchronized.
    Joined,
    /// Left the room (terminal).
    Left,
}

/// The session's half of the signaling connection: an outbound action
/// sink and an inbound event stream, one per (room, participant).
#[derive(Debug)]
pub struct SignalingChannel {
    pub actions: mpsc::Sender<ClientAction>,
    pub events: mpsc::Receiver<ServerEvent>,
}

/// Commands sent from the handle to the actor.
#[derive(Debug)]
enum SessionCommand {
    Join,
    Leave {
        respond_to: oneshot::Sender<()>,
    },
    StartMic,
    StopMic,
    StartCamera,
    StopCamera,
    StartScreenshare,
    StopScreenshare,
    SetMicDevice {
        device_id: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    SetCameraDevice {
        device_id: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    SendChat {
        payload: ChatPayload,
    },
    GetState {
        respond_to: oneshot::Sender<SessionState>,
    },
    GetRoster {
        respond_to: oneshot::Sender<Vec<ParticipantSnapshot>>,
    },
    GetStage {
        respond_to: oneshot::Sender<Vec<Uuid>>,
    },
    GetChat {
        respond_to: oneshot::Sender<Vec<ChatMessage>>,
    },
    GetSelf {
        respond_to: oneshot::Sender<ParticipantSnapshot>,
    },
    GetStartedAt {
        respond_to: oneshot::Sender<Option<DateTime<Utc>>>,
    },
    GetDevices {
        respond_to: oneshot::Sender<Vec<DeviceInfo>>,
    },
}

/// A completed asynchronous media operation, reported back into the
/// actor loop with the generation it was started under.
#[derive(Debug)]
enum MediaResult {
    Push {
        kind: MediaKind,
        generation: u64,
        result: Result<TrackRef, MediaTransportError>,
    },
    ScreensharePush {
        generation: u64,
        result: Result<(TrackRef, Option<TrackRef>), MediaTransportError>,
    },
    Pull {
        participant_id: Uuid,
        kind: MediaKind,
        generation: u64,
        result: Result<(MediaTrack, Option<MediaTrack>), MediaTransportError>,
    },
}

/// Handle to a running [`CallSession`].
#[derive(Debug, Clone)]
pub struct CallSessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: Arc<EventBus>,
    cancel_token: CancellationToken,
}

impl CallSessionHandle {
    /// Enter the room. Valid only from `Connected`; a silent no-op in
    /// any other state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn join(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Join).await
    }

    /// Leave the room, close the transport and terminate the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn leave(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Leave { respond_to: tx }).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Toggle the mic on.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn start_mic(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StartMic).await
    }

    /// Toggle the mic off.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn stop_mic(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StopMic).await
    }

    /// Toggle the camera on.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn start_camera(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StartCamera).await
    }

    /// Toggle the camera off.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn stop_camera(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StopCamera).await
    }

    /// Begin screensharing.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn start_screenshare(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StartScreenshare).await
    }

    /// Stop screensharing.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn stop_screenshare(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::StopScreenshare).await
    }

    /// Re-acquire mic capture from the given device.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` if the id is not in the known device list, or
    /// `Closed` if the session actor is gone.
    pub async fn set_mic_device(&self, device_id: impl Into<String>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::SetMicDevice {
            device_id: device_id.into(),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Re-acquire camera capture from the given device.
    ///
    /// # Errors
    ///
    /// `DeviceNotFound` if the id is not in the known device list, or
    /// `Closed` if the session actor is gone.
    pub async fn set_camera_device(
        &self,
        device_id: impl Into<String>,
    ) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::SetCameraDevice {
            device_id: device_id.into(),
            respond_to: tx,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Send a text chat message.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn send_text_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionCommand::SendChat {
            payload: CallChat::text_payload(text),
        })
        .await
    }

    /// Current lifecycle state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn state(&self) -> Result<SessionState, SessionError> {
        self.query(|respond_to| SessionCommand::GetState { respond_to })
            .await
    }

    /// Snapshot of the current roster in join order.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn roster(&self) -> Result<Vec<ParticipantSnapshot>, SessionError> {
        self.query(|respond_to| SessionCommand::GetRoster { respond_to })
            .await
    }

    /// Current stage membership in admission order.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn stage(&self) -> Result<Vec<Uuid>, SessionError> {
        self.query(|respond_to| SessionCommand::GetStage { respond_to })
            .await
    }

    /// Snapshot of the chat log.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn chat_messages(&self) -> Result<Vec<ChatMessage>, SessionError> {
        self.query(|respond_to| SessionCommand::GetChat { respond_to })
            .await
    }

    /// Snapshot of the local participant's public state.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn self_snapshot(&self) -> Result<ParticipantSnapshot, SessionError> {
        self.query(|respond_to| SessionCommand::GetSelf { respond_to })
            .await
    }

    /// When the room started, known after `room/init`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn started_at(&self) -> Result<Option<DateTime<Utc>>, SessionError> {
        self.query(|respond_to| SessionCommand::GetStartedAt { respond_to })
            .await
    }

    /// Last known capture device list.
    ///
    /// # Errors
    ///
    /// Returns an error if the session actor is gone.
    pub async fn devices(&self) -> Result<Vec<DeviceInfo>, SessionError> {
        self.query(|respond_to| SessionCommand::GetDevices { respond_to })
            .await
    }

    /// Subscribe to one event kind.
    #[must_use]
    pub fn subscribe(&self, kind: SessionEventKind) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe(kind)
    }

    /// Subscribe to every session event.
    #[must_use]
    pub fn subscribe_all(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe_all()
    }

    /// Cancel the session actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the session actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(make(tx)).await?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

/// The session actor.
pub struct CallSession {
    config: CallConfig,
    state: SessionState,
    started_at: Option<DateTime<Utc>>,
    local: LocalParticipant,
    registry: ParticipantRegistry,
    stage: StageSelector,
    chat: CallChat,
    events: Arc<EventBus>,
    transport: Arc<dyn MediaTransport>,
    capture: Arc<dyn CaptureSource>,
    actions: mpsc::Sender<ClientAction>,
    signaling: mpsc::Receiver<ServerEvent>,
    commands: mpsc::Receiver<SessionCommand>,
    media_tx: mpsc::Sender<MediaResult>,
    media_rx: mpsc::Receiver<MediaResult>,
    cancel_token: CancellationToken,
    warmup_pushes: Vec<PushSpec>,
}

impl CallSession {
    /// Spawn a session actor for one room connection.
    ///
    /// Returns a handle and the task join handle.
    #[must_use]
    pub fn spawn(
        config: CallConfig,
        transport: Arc<dyn MediaTransport>,
        capture: Arc<dyn CaptureSource>,
        signaling: SignalingChannel,
    ) -> (CallSessionHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let (media_tx, media_rx) = mpsc::channel(MEDIA_CHANNEL_BUFFER);
        let events = Arc::new(EventBus::new());
        let cancel_token = CancellationToken::new();

        let (local, warmup_pushes) =
            LocalParticipant::new(config.display_name.as_str(), capture.as_ref());
        let stage = StageSelector::new(config.stage_capacity());

        let actor = Self {
            state: SessionState::Unconnected,
            started_at: None,
            local,
            registry: ParticipantRegistry::new(),
            stage,
            chat: CallChat::new(),
            events: Arc::clone(&events),
            transport,
            capture,
            actions: signaling.actions,
            signaling: signaling.events,
            commands: command_rx,
            media_tx,
            media_rx,
            cancel_token: cancel_token.clone(),
            warmup_pushes,
            config,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = CallSessionHandle {
            commands: command_tx,
            events,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor loop.
    #[instrument(skip_all, name = "call.session", fields(room = %self.config.room))]
    async fn run(mut self) {
        info!(
            target: "call.session",
            room = %self.config.room,
            "CallSession started"
        );

        // Warm the mic/camera publish channels with placeholder pushes.
        for push in std::mem::take(&mut self.warmup_pushes) {
            self.spawn_push(push);
        }

        // Default media toggles apply before the room is even joined;
        // the self wire state in the join action carries them.
        if self.config.defaults.audio {
            self.handle_start_mic().await;
        }
        if self.config.defaults.video {
            self.handle_start_camera().await;
        }

        let mut stage_tick = tokio::time::interval(self.config.stage_interval);
        stage_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut volume_tick = tokio::time::interval(self.config.volume_interval);
        volume_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(target: "call.session", "CallSession cancelled");
                    break;
                }

                _ = stage_tick.tick() => {
                    self.recompute_stage();
                }

                _ = volume_tick.tick() => {
                    self.sample_volumes();
                }

                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }

                event = self.signaling.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        None => {
                            self.handle_transport_closed();
                            break;
                        }
                    }
                }

                result = self.media_rx.recv() => {
                    if let Some(result) = result {
                        self.handle_media_result(result).await;
                    }
                }
            }

            if self.state == SessionState::Left {
                break;
            }
        }

        info!(
            target: "call.session",
            room = %self.config.room,
            participants = self.registry.len(),
            "CallSession stopped"
        );
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Join => self.do_join().await,
            SessionCommand::Leave { respond_to } => {
                self.do_leave().await;
                let _ = respond_to.send(());
            }
            SessionCommand::StartMic => self.handle_start_mic().await,
            SessionCommand::StopMic => self.handle_stop_mic().await,
            SessionCommand::StartCamera => self.handle_start_camera().await,
            SessionCommand::StopCamera => self.handle_stop_camera().await,
            SessionCommand::StartScreenshare => {
                if let Some(push) = self.local.start_screenshare(self.capture.as_ref()) {
                    self.spawn_screenshare_push(push);
                }
            }
            SessionCommand::StopScreenshare => {
                self.local.stop_screenshare();
                self.broadcast_self(MediaKind::Screenshare).await;
            }
            SessionCommand::SetMicDevice {
                device_id,
                respond_to,
            } => {
                let result = self
                    .local
                    .set_mic_device(&device_id, self.capture.as_ref())
                    .map(|push| {
                        if let Some(push) = push {
                            self.spawn_push(push);
                        }
                    });
                let _ = respond_to.send(result);
            }
            SessionCommand::SetCameraDevice {
                device_id,
                respond_to,
            } => {
                let result = self
                    .local
                    .set_camera_device(&device_id, self.capture.as_ref())
                    .map(|push| {
                        if let Some(push) = push {
                            self.spawn_push(push);
                        }
                    });
                let _ = respond_to.send(result);
            }
            SessionCommand::SendChat { payload } => {
                self.send_action(ClientAction::Chat { message: payload }).await;
            }
            SessionCommand::GetState { respond_to } => {
                let _ = respond_to.send(self.state);
            }
            SessionCommand::GetRoster { respond_to } => {
                let roster = self
                    .registry
                    .iter()
                    .map(RemoteParticipant::snapshot)
                    .collect();
                let _ = respond_to.send(roster);
            }
            SessionCommand::GetStage { respond_to } => {
                let _ = respond_to.send(self.stage.stage().to_vec());
            }
            SessionCommand::GetChat { respond_to } => {
                let _ = respond_to.send(self.chat.messages().to_vec());
            }
            SessionCommand::GetSelf { respond_to } => {
                let _ = respond_to.send(self.local.snapshot());
            }
            SessionCommand::GetStartedAt { respond_to } => {
                let _ = respond_to.send(self.started_at);
            }
            SessionCommand::GetDevices { respond_to } => {
                let _ = respond_to.send(self.local.devices().to_vec());
            }
        }
    }

    /// Apply one server event.
    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected => {
                if self.state != SessionState::Unconnected {
                    debug!(target: "call.session", state = ?self.state, "connected event ignored");
                    return;
                }
                self.state = SessionState::Connected;
                self.events.emit(SessionEvent::Connected);
                if self.config.auto_join {
                    self.do_join().await;
                }
            }

            ServerEvent::RoomInit {
                participants,
                started_at,
                chat_messages,
            } => {
                if self.state != SessionState::Connected {
                    debug!(target: "call.session", state = ?self.state, "room/init ignored");
                    return;
                }

                let mut stage_changes = Vec::new();
                for wire in &participants {
                    let (participant, pulls) = RemoteParticipant::from_wire(wire);
                    let id = participant.id();
                    let snapshot = participant.snapshot();
                    self.registry.insert(participant);
                    self.events
                        .emit(SessionEvent::ParticipantAdded { participant: snapshot });
                    if let Some(change) = self.stage.on_participant_joined(id) {
                        stage_changes.push(change);
                    }
                    for pull in pulls {
                        self.spawn_pull(pull);
                    }
                }
                self.emit_stage_changes(&stage_changes);

                self.started_at = Some(started_at);
                self.chat.add_messages_in_bulk(chat_messages.clone());
                self.events.emit(SessionEvent::ChatLoaded {
                    messages: chat_messages,
                });

                self.state = SessionState::Joined;
                self.events.emit(SessionEvent::Joined);
                info!(
                    target: "call.session",
                    participants = self.registry.len(),
                    "Joined room"
                );
            }

            ServerEvent::ParticipantJoined { participant } => {
                let (participant, pulls) = RemoteParticipant::from_wire(&participant);
                let id = participant.id();
                let snapshot = participant.snapshot();
                match self.registry.insert(participant) {
                    RegistryChange::Added => {
                        self.events
                            .emit(SessionEvent::ParticipantAdded { participant: snapshot });
                        let change = self.stage.on_participant_joined(id);
                        if let Some(change) = change {
                            self.emit_stage_changes(&[change]);
                        }
                    }
                    RegistryChange::Updated => {
                        // Replayed join: full replacement, no re-admission.
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                    }
                }
                for pull in pulls {
                    self.spawn_pull(pull);
                }
            }

            ServerEvent::ParticipantLeft { participant_id } => {
                let Some(removed) = self.registry.remove(participant_id) else {
                    debug!(target: "call.session", "participant/left for unknown id ignored");
                    return;
                };
                self.events.emit(SessionEvent::ParticipantRemoved {
                    participant: removed.snapshot(),
                });

                // Backfill within the same pass instead of waiting for
                // the next recompute interval.
                let roster = self.registry.ids();
                let registry = &self.registry;
                let changes = self
                    .stage
                    .on_participant_left(participant_id, &roster, |id| registry.volume_dbfs(id));
                self.emit_stage_changes(&changes);
            }

            ServerEvent::ParticipantMicUpdate { data } => {
                let id = data.participant_id;
                let Some(participant) = self.registry.get_mut(id) else {
                    warn!(target: "call.session", "mic-update for unknown participant ignored");
                    return;
                };
                let prior_level = participant.volume_level();
                let outcome = participant.apply_mic_update(&data.updates);
                let level = participant.volume_level();
                let snapshot = participant.snapshot();
                match outcome {
                    SlotOutcome::NoChange => {}
                    SlotOutcome::Enabling => {
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                    }
                    SlotOutcome::Disabled => {
                        self.events.emit(SessionEvent::MicUpdate {
                            participant_id: id,
                            enabled: false,
                            track: None,
                        });
                        if level != prior_level {
                            self.events
                                .emit(SessionEvent::VolumeChanged { participant_id: id, level });
                        }
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                    }
                    SlotOutcome::StartPull(spec) => {
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                        self.spawn_pull(spec);
                    }
                }
            }

            ServerEvent::ParticipantCameraUpdate { data } => {
                let id = data.participant_id;
                let Some(participant) = self.registry.get_mut(id) else {
                    warn!(target: "call.session", "camera-update for unknown participant ignored");
                    return;
                };
                let outcome = participant.apply_camera_update(&data.updates);
                let snapshot = participant.snapshot();
                match outcome {
                    SlotOutcome::NoChange => {}
                    SlotOutcome::Enabling => {
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                    }
                    SlotOutcome::Disabled => {
                        self.events.emit(SessionEvent::CameraUpdate {
                            participant_id: id,
                            enabled: false,
                            track: None,
                        });
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                    }
                    SlotOutcome::StartPull(spec) => {
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                        self.spawn_pull(spec);
                    }
                }
            }

            ServerEvent::ParticipantScreenshareUpdate { data } => {
                let id = data.participant_id;
                let Some(participant) = self.registry.get_mut(id) else {
                    warn!(
                        target: "call.session",
                        "screenshare-update for unknown participant ignored"
                    );
                    return;
                };
                let outcome = participant.apply_screenshare_update(&data.updates);
                let snapshot = participant.snapshot();
                match outcome {
                    SlotOutcome::NoChange => {}
                    SlotOutcome::Enabling => {
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                    }
                    SlotOutcome::Disabled => {
                        self.events.emit(SessionEvent::ScreenshareUpdate {
                            participant_id: id,
                            enabled: false,
                            video_track: None,
                            audio_track: None,
                        });
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                    }
                    SlotOutcome::StartPull(spec) => {
                        self.events
                            .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                        self.spawn_pull(spec);
                    }
                }
            }

            ServerEvent::ChatNewMessage { message } => {
                self.chat.add_message(message.clone());
                self.events.emit(SessionEvent::ChatMessage { message });
            }
        }
    }

    async fn handle_media_result(&mut self, result: MediaResult) {
        match result {
            MediaResult::Push {
                kind,
                generation,
                result,
            } => match result {
                Ok(track_ref) => {
                    if self.local.accept_push(kind, generation, track_ref) {
                        self.broadcast_self(kind).await;
                    } else {
                        debug!(target: "call.session", %kind, "superseded push result discarded");
                    }
                }
                Err(error) => {
                    self.report_error(&SessionError::Media(error.to_string()));
                }
            },

            MediaResult::ScreensharePush { generation, result } => match result {
                Ok((video_ref, audio_ref)) => {
                    if self
                        .local
                        .accept_screenshare_push(generation, video_ref, audio_ref)
                    {
                        self.broadcast_self(MediaKind::Screenshare).await;
                    } else {
                        debug!(target: "call.session", "superseded screenshare push discarded");
                    }
                }
                Err(error) => {
                    self.report_error(&SessionError::Media(error.to_string()));
                }
            },

            MediaResult::Pull {
                participant_id,
                kind,
                generation,
                result,
            } => {
                let Some(participant) = self.registry.get_mut(participant_id) else {
                    debug!(target: "call.session", "pull result for departed participant dropped");
                    return;
                };
                match result {
                    Ok((track, audio_track)) => {
                        if participant.apply_resolved(
                            kind,
                            generation,
                            track.clone(),
                            audio_track.clone(),
                        ) {
                            let snapshot = participant.snapshot();
                            let event = match kind {
                                MediaKind::Mic => SessionEvent::MicUpdate {
                                    participant_id,
                                    enabled: true,
                                    track: Some(track),
                                },
                                MediaKind::Camera => SessionEvent::CameraUpdate {
                                    participant_id,
                                    enabled: true,
                                    track: Some(track),
                                },
                                MediaKind::Screenshare => SessionEvent::ScreenshareUpdate {
                                    participant_id,
                                    enabled: true,
                                    video_track: Some(track),
                                    audio_track,
                                },
                            };
                            self.events.emit(event);
                            self.events
                                .emit(SessionEvent::ParticipantUpdated { participant: snapshot });
                        } else {
                            debug!(
                                target: "call.session",
                                %kind,
                                "superseded pull result discarded"
                            );
                        }
                    }
                    Err(error) => {
                        if participant.apply_pull_failed(kind, generation) {
                            warn!(
                                target: "call.session",
                                %kind,
                                error = %error,
                                "track pull failed"
                            );
                        }
                    }
                }
            }
        }
    }

    /// Enter the room; silent no-op outside `Connected`.
    async fn do_join(&mut self) {
        if self.state != SessionState::Connected {
            debug!(target: "call.session", state = ?self.state, "join() ignored");
            return;
        }
        let action = ClientAction::Join {
            participant: self.local.to_wire(),
        };
        self.send_action(action).await;
    }

    async fn do_leave(&mut self) {
        if self.state == SessionState::Left {
            return;
        }
        self.send_action(ClientAction::Leave).await;
        self.state = SessionState::Left;
        self.events.emit(SessionEvent::Left);
        self.cancel_token.cancel();
    }

    fn handle_transport_closed(&mut self) {
        if self.state == SessionState::Left {
            return;
        }
        self.report_error(&SessionError::Transport(
            "signaling channel closed".to_string(),
        ));
        self.state = SessionState::Left;
        self.events.emit(SessionEvent::Left);
    }

    async fn handle_start_mic(&mut self) {
        if let Some(push) = self.local.start_mic(self.capture.as_ref()) {
            self.spawn_push(push);
            // The warm channel may already know its reference.
            self.broadcast_self(MediaKind::Mic).await;
        }
    }

    async fn handle_stop_mic(&mut self) {
        if let Some(push) = self.local.stop_mic(self.capture.as_ref()) {
            self.spawn_push(push);
            self.broadcast_self(MediaKind::Mic).await;
        }
    }

    async fn handle_start_camera(&mut self) {
        if let Some(push) = self.local.start_camera(self.capture.as_ref()) {
            self.spawn_push(push);
            self.broadcast_self(MediaKind::Camera).await;
        }
    }

    async fn handle_stop_camera(&mut self) {
        if let Some(push) = self.local.stop_camera(self.capture.as_ref()) {
            self.spawn_push(push);
            self.broadcast_self(MediaKind::Camera).await;
        }
    }

    /// Broadcast the local `(enabled, trackRef)` pair for `kind` if it
    /// changed since the last broadcast; never a partial pair.
    async fn broadcast_self(&mut self, kind: MediaKind) {
        let action = match kind {
            MediaKind::Mic => self
                .local
                .pending_mic_action()
                .map(|updates| ClientAction::MicUpdate { updates }),
            MediaKind::Camera => self
                .local
                .pending_camera_action()
                .map(|updates| ClientAction::CameraUpdate { updates }),
            MediaKind::Screenshare => self
                .local
                .pending_screenshare_action()
                .map(|updates| ClientAction::ScreenshareUpdate { updates }),
        };
        if let Some(action) = action {
            self.send_action(action).await;
            self.events.emit(SessionEvent::SelfUpdated {
                participant: self.local.snapshot(),
            });
        }
    }

    /// Fire-and-forget action send; failures surface via the error
    /// callback, never as retries.
    async fn send_action(&mut self, action: ClientAction) {
        if self.actions.send(action).await.is_err() {
            self.report_error(&SessionError::Transport(
                "signaling send failed".to_string(),
            ));
        }
    }

    fn recompute_stage(&mut self) {
        if self.state != SessionState::Joined {
            return;
        }
        let roster = self.registry.ids();
        let registry = &self.registry;
        let changes = self
            .stage
            .reconcile(&roster, |id| registry.volume_dbfs(id));
        self.emit_stage_changes(&changes);
    }

    fn sample_volumes(&mut self) {
        if self.state != SessionState::Joined {
            return;
        }
        for change in VolumeEstimator::sample(&mut self.registry) {
            self.events.emit(SessionEvent::VolumeChanged {
                participant_id: change.participant_id,
                level: change.level,
            });
        }
    }

    fn emit_stage_changes(&self, changes: &[StageChange]) {
        for change in changes {
            let event = match change {
                StageChange::Added(id) => SessionEvent::StageAdded {
                    participant_id: *id,
                },
                StageChange::Removed(id) => SessionEvent::StageRemoved {
                    participant_id: *id,
                },
            };
            self.events.emit(event);
        }
        if !changes.is_empty() {
            self.events.emit(SessionEvent::StageUpdated {
                stage: self.stage.stage().to_vec(),
            });
        }
    }

    fn spawn_push(&self, push: PushSpec) {
        let transport = Arc::clone(&self.transport);
        let media_tx = self.media_tx.clone();
        tokio::spawn(async move {
            let result = transport.push(push.track, push.options).await;
            let _ = media_tx
                .send(MediaResult::Push {
                    kind: push.kind,
                    generation: push.generation,
                    result,
                })
                .await;
        });
    }

    fn spawn_screenshare_push(&self, push: ScreensharePushSpec) {
        let transport = Arc::clone(&self.transport);
        let media_tx = self.media_tx.clone();
        tokio::spawn(async move {
            let result: Result<(TrackRef, Option<TrackRef>), MediaTransportError> = async {
                let video_ref = transport
                    .push(push.video, EncodingOptions::default())
                    .await?;
                let audio_ref = match push.audio {
                    Some(audio) => Some(transport.push(audio, EncodingOptions::default()).await?),
                    None => None,
                };
                Ok((video_ref, audio_ref))
            }
            .await;
            let _ = media_tx
                .send(MediaResult::ScreensharePush {
                    generation: push.generation,
                    result,
                })
                .await;
        });
    }

    fn spawn_pull(&self, pull: PullSpec) {
        let transport = Arc::clone(&self.transport);
        let media_tx = self.media_tx.clone();
        let options = match pull.kind {
            MediaKind::Camera => PullOptions {
                preferred_rid: Some(self.config.video_quality.rid()),
            },
            MediaKind::Mic | MediaKind::Screenshare => PullOptions::default(),
        };
        tokio::spawn(async move {
            let result: Result<(MediaTrack, Option<MediaTrack>), MediaTransportError> = async {
                let track = transport.pull(pull.track_ref.clone(), options).await?;
                let audio_track = match &pull.audio_ref {
                    Some(audio_ref) => Some(
                        transport
                            .pull(audio_ref.clone(), PullOptions::default())
                            .await?,
                    ),
                    None => None,
                };
                Ok((track, audio_track))
            }
            .await;
            let _ = media_tx
                .send(MediaResult::Pull {
                    participant_id: pull.participant_id,
                    kind: pull.kind,
                    generation: pull.generation,
                    result,
                })
                .await;
        });
    }

    fn report_error(&self, error: &SessionError) {
        warn!(target: "call.session", error = %error, "session error");
        if let Some(callback) = &self.config.on_error {
            callback(error);
        }
        self.events.emit(SessionEvent::Error {
            message: error.to_string(),
        });
    }
}
