//! Remote participant state, one per non-local roster member.
//!
//! Each media kind advances through `Idle -> Enabling -> Resolving ->
//! Active` and falls back to `Idle` on disable or pull failure. Every
//! transition bumps a per-kind generation counter; an asynchronous pull
//! result is accepted only if its generation still matches, so a
//! disable or a newer reference arriving while a pull is in flight
//! silently invalidates the stale result.

use call_protocol::{CameraUpdate, MicUpdate, ParticipantWire, ScreenshareUpdate};
use std::sync::Arc;
use uuid::Uuid;

use crate::media::{AudioSource, MediaKind, MediaState, MediaTrack, TrackRef};
use crate::volume::SILENCE_DBFS;

/// Per-kind resolution phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Disabled, nothing referenced.
    Idle,
    /// Enabled observed, track reference not yet known.
    Enabling,
    /// Reference known, pull in flight.
    Resolving,
    /// Pull resolved, live track available.
    Active,
}

/// What the session must do after applying an update to a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SlotOutcome {
    /// Identical replayed update; no transition, nothing to do.
    NoChange,
    /// Enabled without a reference; wait for the full pair.
    Enabling,
    /// Disabled; reference and track were cleared atomically.
    Disabled,
    /// Enabled with a reference; start the described pull.
    StartPull(PullSpec),
}

/// A pull the session should spawn against the media transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PullSpec {
    pub participant_id: Uuid,
    pub kind: MediaKind,
    pub generation: u64,
    pub track_ref: TrackRef,
    /// Screenshare audio companion, pulled under the same generation.
    pub audio_ref: Option<TrackRef>,
}

/// State machine for one mic or camera slot.
#[derive(Debug)]
struct MediaSlot {
    phase: SlotPhase,
    enabled: bool,
    track_ref: Option<TrackRef>,
    track: Option<MediaTrack>,
    generation: u64,
}

impl MediaSlot {
    fn new() -> Self {
        Self {
            phase: SlotPhase::Idle,
            enabled: false,
            track_ref: None,
            track: None,
            generation: 0,
        }
    }

    /// Apply a full-replacement update for this kind.
    fn apply(&mut self, enabled: bool, track_ref: Option<TrackRef>) -> (bool, u64) {
        if enabled == self.enabled && track_ref == self.track_ref {
            // Replayed update: no transition, no generation bump.
            return (false, self.generation);
        }

        self.generation += 1;
        self.enabled = enabled;
        self.track = None;
        if enabled {
            self.phase = if track_ref.is_some() {
                SlotPhase::Resolving
            } else {
                SlotPhase::Enabling
            };
            self.track_ref = track_ref;
        } else {
            self.phase = SlotPhase::Idle;
            self.track_ref = None;
        }
        (true, self.generation)
    }

    /// Accept a resolved track if the generation is still current.
    fn resolve(&mut self, generation: u64, track: MediaTrack) -> bool {
        if generation != self.generation || self.phase != SlotPhase::Resolving {
            return false;
        }
        self.phase = SlotPhase::Active;
        self.track = Some(track);
        true
    }

    /// Record a failed pull; the slot falls back to `Idle`.
    fn resolve_failed(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.phase != SlotPhase::Resolving {
            return false;
        }
        self.phase = SlotPhase::Idle;
        self.track = None;
        true
    }

    fn state(&self) -> MediaState {
        match (&self.track_ref, &self.track) {
            _ if !self.enabled => MediaState::disabled(),
            (Some(track_ref), Some(track)) => {
                MediaState::active(track_ref.clone(), track.clone())
            }
            (Some(track_ref), None) => MediaState::resolving(track_ref.clone()),
            (None, _) => MediaState::enabling(),
        }
    }
}

/// State machine for the screenshare slot: a video reference plus an
/// optional audio companion, resolved under one generation.
#[derive(Debug)]
struct ScreenshareSlot {
    phase: SlotPhase,
    enabled: bool,
    video_ref: Option<TrackRef>,
    audio_ref: Option<TrackRef>,
    video_track: Option<MediaTrack>,
    audio_track: Option<MediaTrack>,
    generation: u64,
}

impl ScreenshareSlot {
    fn new() -> Self {
        Self {
            phase: SlotPhase::Idle,
            enabled: false,
            video_ref: None,
            audio_ref: None,
            video_track: None,
            audio_track: None,
            generation: 0,
        }
    }

    fn apply(
        &mut self,
        enabled: bool,
        video_ref: Option<TrackRef>,
        audio_ref: Option<TrackRef>,
    ) -> (bool, u64) {
        if enabled == self.enabled && video_ref == self.video_ref && audio_ref == self.audio_ref {
            return (false, self.generation);
        }

        self.generation += 1;
        self.enabled = enabled;
        self.video_track = None;
        self.audio_track = None;
        if enabled {
            self.phase = if video_ref.is_some() {
                SlotPhase::Resolving
            } else {
                SlotPhase::Enabling
            };
            self.video_ref = video_ref;
            self.audio_ref = audio_ref;
        } else {
            self.phase = SlotPhase::Idle;
            self.video_ref = None;
            self.audio_ref = None;
        }
        (true, self.generation)
    }

    fn resolve(
        &mut self,
        generation: u64,
        video_track: MediaTrack,
        audio_track: Option<MediaTrack>,
    ) -> bool {
        if generation != self.generation || self.phase != SlotPhase::Resolving {
            return false;
        }
        self.phase = SlotPhase::Active;
        self.video_track = Some(video_track);
        self.audio_track = audio_track;
        true
    }

    fn resolve_failed(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.phase != SlotPhase::Resolving {
            return false;
        }
        self.phase = SlotPhase::Idle;
        self.video_track = None;
        self.audio_track = None;
        true
    }
}

/// Screenshare portion of a participant snapshot.
#[derive(Debug, Clone, Default)]
pub struct ScreenshareState {
    pub enabled: bool,
    pub video_ref: Option<TrackRef>,
    pub audio_ref: Option<TrackRef>,
    pub video_track: Option<MediaTrack>,
    pub audio_track: Option<MediaTrack>,
}

/// Point-in-time public state of a participant, carried in events.
#[derive(Debug, Clone)]
pub struct ParticipantSnapshot {
    pub id: Uuid,
    pub name: String,
    pub mic: MediaState,
    pub camera: MediaState,
    pub screenshare: ScreenshareState,
    /// Coarse speaking level, 0-10.
    pub volume_level: u8,
}

impl ParticipantSnapshot {
    /// Serialize the public state; live track handles are excluded and
    /// references travel only for enabled kinds.
    #[must_use]
    pub fn to_wire(&self) -> ParticipantWire {
        let mut wire = ParticipantWire::new(self.id, self.name.clone());
        wire.mic_enabled = self.mic.enabled();
        wire.mic_track_id = self
            .mic
            .enabled()
            .then(|| self.mic.track_ref().map(|r| r.0.clone()))
            .flatten();
        wire.camera_enabled = self.camera.enabled();
        wire.camera_track_id = self
            .camera
            .enabled()
            .then(|| self.camera.track_ref().map(|r| r.0.clone()))
            .flatten();
        wire.screenshare_enabled = self.screenshare.enabled;
        if self.screenshare.enabled {
            wire.screenshare_video_track_id =
                self.screenshare.video_ref.as_ref().map(|r| r.0.clone());
            wire.screenshare_audio_track_id =
                self.screenshare.audio_ref.as_ref().map(|r| r.0.clone());
        }
        wire
    }
}

/// One non-local participant.
#[derive(Debug)]
pub struct RemoteParticipant {
    id: Uuid,
    name: String,
    mic: MediaSlot,
    camera: MediaSlot,
    screenshare: ScreenshareSlot,
    volume_dbfs: f64,
    volume_level: u8,
}

impl RemoteParticipant {
    /// Build a participant from its wire state, returning the pulls the
    /// session must start for kinds that arrived already enabled.
    pub(crate) fn from_wire(wire: &ParticipantWire) -> (Self, Vec<PullSpec>) {
        let mut participant = Self {
            id: wire.id,
            name: wire.name.clone(),
            mic: MediaSlot::new(),
            camera: MediaSlot::new(),
            screenshare: ScreenshareSlot::new(),
            volume_dbfs: SILENCE_DBFS,
            volume_level: 0,
        };

        let mut pulls = Vec::new();
        let outcome = participant.apply_mic_update(&MicUpdate {
            mic_enabled: wire.mic_enabled,
            mic_track_id: wire.mic_track_id.clone(),
        });
        if let SlotOutcome::StartPull(spec) = outcome {
            pulls.push(spec);
        }
        let outcome = participant.apply_camera_update(&CameraUpdate {
            camera_enabled: wire.camera_enabled,
            camera_track_id: wire.camera_track_id.clone(),
        });
        if let SlotOutcome::StartPull(spec) = outcome {
            pulls.push(spec);
        }
        let outcome = participant.apply_screenshare_update(&ScreenshareUpdate {
            screenshare_enabled: wire.screenshare_enabled,
            screenshare_video_track_id: wire.screenshare_video_track_id.clone(),
            screenshare_audio_track_id: wire.screenshare_audio_track_id.clone(),
        });
        if let SlotOutcome::StartPull(spec) = outcome {
            pulls.push(spec);
        }

        (participant, pulls)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply a full mic replacement.
    pub(crate) fn apply_mic_update(&mut self, updates: &MicUpdate) -> SlotOutcome {
        let track_ref = updates.mic_track_id.clone().map(TrackRef);
        let (changed, generation) = self.mic.apply(updates.mic_enabled, track_ref);
        if !changed {
            return SlotOutcome::NoChange;
        }
        match self.mic.phase {
            SlotPhase::Resolving => {
                self.mic.track_ref.clone().map_or(SlotOutcome::NoChange, |track_ref| {
                    SlotOutcome::StartPull(PullSpec {
                        participant_id: self.id,
                        kind: MediaKind::Mic,
                        generation,
                        track_ref,
                        audio_ref: None,
                    })
                })
            }
            SlotPhase::Enabling => SlotOutcome::Enabling,
            SlotPhase::Idle | SlotPhase::Active => {
                // The mic went silent the instant it was disabled.
                self.reset_volume();
                SlotOutcome::Disabled
            }
        }
    }

    /// Apply a full camera replacement.
    pub(crate) fn apply_camera_update(&mut self, updates: &CameraUpdate) -> SlotOutcome {
        let track_ref = updates.camera_track_id.clone().map(TrackRef);
        let (changed, generation) = self.camera.apply(updates.camera_enabled, track_ref);
        if !changed {
            return SlotOutcome::NoChange;
        }
        match self.camera.phase {
            SlotPhase::Resolving => {
                self.camera.track_ref.clone().map_or(SlotOutcome::NoChange, |track_ref| {
                    SlotOutcome::StartPull(PullSpec {
                        participant_id: self.id,
                        kind: MediaKind::Camera,
                        generation,
                        track_ref,
                        audio_ref: None,
                    })
                })
            }
            SlotPhase::Enabling => SlotOutcome::Enabling,
            SlotPhase::Idle | SlotPhase::Active => SlotOutcome::Disabled,
        }
    }

    /// Apply a full screenshare replacement.
    pub(crate) fn apply_screenshare_update(
        &mut self,
        updates: &ScreenshareUpdate,
    ) -> SlotOutcome {
        let video_ref = updates.screenshare_video_track_id.clone().map(TrackRef);
        let audio_ref = updates.screenshare_audio_track_id.clone().map(TrackRef);
        let (changed, generation) =
            self.screenshare
                .apply(updates.screenshare_enabled, video_ref, audio_ref);
        if !changed {
            return SlotOutcome::NoChange;
        }
        match self.screenshare.phase {
            SlotPhase::Resolving => {
                self.screenshare
                    .video_ref
                    .clone()
                    .map_or(SlotOutcome::NoChange, |track_ref| {
                        SlotOutcome::StartPull(PullSpec {
                            participant_id: self.id,
                            kind: MediaKind::Screenshare,
                            generation,
                            track_ref,
                            audio_ref: self.screenshare.audio_ref.clone(),
                        })
                    })
            }
            SlotPhase::Enabling => SlotOutcome::Enabling,
            SlotPhase::Idle | SlotPhase::Active => SlotOutcome::Disabled,
        }
    }

    /// Accept a resolved pull if its generation is still current.
    ///
    /// Returns `false` for superseded results, which are discarded.
    pub(crate) fn apply_resolved(
        &mut self,
        kind: MediaKind,
        generation: u64,
        track: MediaTrack,
        audio_track: Option<MediaTrack>,
    ) -> bool {
        match kind {
            MediaKind::Mic => self.mic.resolve(generation, track),
            MediaKind::Camera => self.camera.resolve(generation, track),
            MediaKind::Screenshare => self.screenshare.resolve(generation, track, audio_track),
        }
    }

    /// Record a failed pull; stale failures are ignored too.
    pub(crate) fn apply_pull_failed(&mut self, kind: MediaKind, generation: u64) -> bool {
        match kind {
            MediaKind::Mic => self.mic.resolve_failed(generation),
            MediaKind::Camera => self.camera.resolve_failed(generation),
            MediaKind::Screenshare => self.screenshare.resolve_failed(generation),
        }
    }

    /// The live mic audio source, present only while the mic is Active.
    #[must_use]
    pub fn mic_audio_source(&self) -> Option<Arc<dyn AudioSource>> {
        if self.mic.phase != SlotPhase::Active {
            return None;
        }
        self.mic.track.as_ref().and_then(|t| t.audio().cloned())
    }

    /// The resolved mic track, if Active.
    #[must_use]
    pub fn mic_track(&self) -> Option<&MediaTrack> {
        self.mic.track.as_ref()
    }

    /// The resolved camera track, if Active.
    #[must_use]
    pub fn camera_track(&self) -> Option<&MediaTrack> {
        self.camera.track.as_ref()
    }

    #[must_use]
    pub fn mic_enabled(&self) -> bool {
        self.mic.enabled
    }

    #[must_use]
    pub fn camera_enabled(&self) -> bool {
        self.camera.enabled
    }

    #[must_use]
    pub fn screenshare_enabled(&self) -> bool {
        self.screenshare.enabled
    }

    pub(crate) fn mic_phase(&self) -> SlotPhase {
        self.mic.phase
    }

    /// Update the stored volume; true when the coarse level moved.
    pub(crate) fn set_volume(&mut self, dbfs: f64, level: u8) -> bool {
        self.volume_dbfs = dbfs;
        if level == self.volume_level {
            return false;
        }
        self.volume_level = level;
        true
    }

    /// Sink to the silence floor; true when the coarse level moved.
    pub(crate) fn reset_volume(&mut self) -> bool {
        self.set_volume(SILENCE_DBFS, 0)
    }

    /// Current ranking value for stage selection.
    #[must_use]
    pub fn volume_dbfs(&self) -> f64 {
        self.volume_dbfs
    }

    #[must_use]
    pub fn volume_level(&self) -> u8 {
        self.volume_level
    }

    /// Point-in-time public state.
    #[must_use]
    pub fn snapshot(&self) -> ParticipantSnapshot {
        ParticipantSnapshot {
            id: self.id,
            name: self.name.clone(),
            mic: self.mic.state(),
            camera: self.camera.state(),
            screenshare: ScreenshareState {
                enabled: self.screenshare.enabled,
                video_ref: self.screenshare.video_ref.clone(),
                audio_ref: self.screenshare.audio_ref.clone(),
                video_track: self.screenshare.video_track.clone(),
                audio_track: self.screenshare.audio_track.clone(),
            },
            volume_level: self.volume_level,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use call_protocol::ParticipantWire;

    fn participant() -> RemoteParticipant {
        let wire = ParticipantWire::new(Uuid::new_v4(), "Ada");
        RemoteParticipant::from_wire(&wire).0
    }

    fn track(id: &str) -> MediaTrack {
        MediaTrack::new(TrackRef(id.to_string()), None)
    }

    fn enabled_mic(track_id: &str) -> MicUpdate {
        MicUpdate {
            mic_enabled: true,
            mic_track_id: Some(track_id.to_string()),
        }
    }

    #[test]
    fn test_enable_with_ref_starts_pull() {
        let mut p = participant();
        let outcome = p.apply_mic_update(&enabled_mic("s:a"));
        let SlotOutcome::StartPull(spec) = outcome else {
            panic!("expected StartPull, got {outcome:?}");
        };
        assert_eq!(spec.kind, MediaKind::Mic);
        assert_eq!(spec.track_ref, TrackRef("s:a".to_string()));
        assert_eq!(p.mic_phase(), SlotPhase::Resolving);
    }

    #[test]
    fn test_identical_replayed_update_is_no_change() {
        // Scenario C: two identical mic updates back to back produce
        // exactly one transition and one pull.
        let mut p = participant();
        let first = p.apply_mic_update(&enabled_mic("s:a"));
        assert!(matches!(first, SlotOutcome::StartPull(_)));

        let second = p.apply_mic_update(&enabled_mic("s:a"));
        assert_eq!(second, SlotOutcome::NoChange);

        // The first (and only) pull still resolves.
        let SlotOutcome::StartPull(spec) = first else {
            unreachable!()
        };
        assert!(p.apply_resolved(MediaKind::Mic, spec.generation, track("s:a"), None));
        assert_eq!(p.mic_phase(), SlotPhase::Active);

        // Replaying after Active is still absorbed.
        assert_eq!(p.apply_mic_update(&enabled_mic("s:a")), SlotOutcome::NoChange);
        assert_eq!(p.mic_phase(), SlotPhase::Active);
    }

    #[test]
    fn test_stale_generation_result_is_discarded() {
        // Scenario D shape: enable, supersede mid-flight, then the old
        // pull lands - it must not be applied.
        let mut p = participant();
        let SlotOutcome::StartPull(stale) = p.apply_camera_update(&CameraUpdate {
            camera_enabled: true,
            camera_track_id: Some("s:v1".to_string()),
        }) else {
            panic!("expected StartPull")
        };

        // Off then on with a newer reference before the pull resolves.
        assert_eq!(
            p.apply_camera_update(&CameraUpdate::disabled()),
            SlotOutcome::Disabled
        );
        let SlotOutcome::StartPull(fresh) = p.apply_camera_update(&CameraUpdate {
            camera_enabled: true,
            camera_track_id: Some("s:v2".to_string()),
        }) else {
            panic!("expected StartPull")
        };

        // Stale result arrives late and is discarded.
        assert!(!p.apply_resolved(MediaKind::Camera, stale.generation, track("s:v1"), None));
        assert!(p.camera_track().is_none());

        // Current result is accepted.
        assert!(p.apply_resolved(MediaKind::Camera, fresh.generation, track("s:v2"), None));
        assert_eq!(p.camera_track().unwrap().id(), &TrackRef("s:v2".to_string()));
    }

    #[test]
    fn test_disable_clears_ref_and_track_atomically() {
        let mut p = participant();
        let SlotOutcome::StartPull(spec) = p.apply_mic_update(&enabled_mic("s:a")) else {
            panic!("expected StartPull")
        };
        assert!(p.apply_resolved(MediaKind::Mic, spec.generation, track("s:a"), None));
        assert!(p.mic_track().is_some());

        assert_eq!(
            p.apply_mic_update(&MicUpdate::disabled()),
            SlotOutcome::Disabled
        );
        let snapshot = p.snapshot();
        assert!(!snapshot.mic.enabled());
        assert!(snapshot.mic.track_ref().is_none());
        assert!(snapshot.mic.track().is_none());
    }

    #[test]
    fn test_disable_sinks_volume_to_floor() {
        let mut p = participant();
        let SlotOutcome::StartPull(spec) = p.apply_mic_update(&enabled_mic("s:a")) else {
            panic!("expected StartPull")
        };
        assert!(p.apply_resolved(MediaKind::Mic, spec.generation, track("s:a"), None));
        p.set_volume(-20.0, 8);

        p.apply_mic_update(&MicUpdate::disabled());
        assert_eq!(p.volume_dbfs(), f64::NEG_INFINITY);
        assert_eq!(p.volume_level(), 0);
    }

    #[test]
    fn test_enabled_without_ref_is_enabling() {
        let mut p = participant();
        let outcome = p.apply_mic_update(&MicUpdate {
            mic_enabled: true,
            mic_track_id: None,
        });
        assert_eq!(outcome, SlotOutcome::Enabling);
        assert_eq!(p.mic_phase(), SlotPhase::Enabling);
        assert!(p.mic_track().is_none());
    }

    #[test]
    fn test_pull_failure_falls_back_to_idle() {
        let mut p = participant();
        let SlotOutcome::StartPull(spec) = p.apply_mic_update(&enabled_mic("s:a")) else {
            panic!("expected StartPull")
        };
        assert!(p.apply_pull_failed(MediaKind::Mic, spec.generation));
        assert_eq!(p.mic_phase(), SlotPhase::Idle);

        // A stale failure is ignored.
        assert!(!p.apply_pull_failed(MediaKind::Mic, spec.generation));
    }

    #[test]
    fn test_screenshare_resolves_both_tracks_under_one_generation() {
        let mut p = participant();
        let SlotOutcome::StartPull(spec) = p.apply_screenshare_update(&ScreenshareUpdate {
            screenshare_enabled: true,
            screenshare_video_track_id: Some("s:sv".to_string()),
            screenshare_audio_track_id: Some("s:sa".to_string()),
        }) else {
            panic!("expected StartPull")
        };
        assert_eq!(spec.audio_ref, Some(TrackRef("s:sa".to_string())));

        assert!(p.apply_resolved(
            MediaKind::Screenshare,
            spec.generation,
            track("s:sv"),
            Some(track("s:sa")),
        ));
        let snapshot = p.snapshot();
        assert!(snapshot.screenshare.enabled);
        assert!(snapshot.screenshare.video_track.is_some());
        assert!(snapshot.screenshare.audio_track.is_some());
    }

    #[test]
    fn test_wire_round_trip_preserves_id_name_flags() {
        let mut wire = ParticipantWire::new(Uuid::new_v4(), "Grace");
        wire.mic_enabled = true;
        wire.mic_track_id = Some("s:a".to_string());
        wire.camera_enabled = false;

        let (p, pulls) = RemoteParticipant::from_wire(&wire);
        assert_eq!(pulls.len(), 1);

        let back = p.snapshot().to_wire();
        assert_eq!(back.id, wire.id);
        assert_eq!(back.name, wire.name);
        assert_eq!(back.mic_enabled, wire.mic_enabled);
        assert_eq!(back.camera_enabled, wire.camera_enabled);
        assert_eq!(back.screenshare_enabled, wire.screenshare_enabled);
    }
}
