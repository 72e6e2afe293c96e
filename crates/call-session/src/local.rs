//! Local participant: capture lifecycle and the always-warm publish
//! channel.
//!
//! Mic and camera each keep a continuous push to the media transport
//! alive even while disabled, publishing a low-cost placeholder stream
//! (silent audio / blank video) so toggling on resumes instantly.
//! Whenever the `(enabled, trackRef)` pair for a kind changes, the full
//! current pair is broadcast as a signaling action - never a partial
//! pair. Push results carry generation tokens so a rapid toggle or
//! device switch invalidates superseded publishes on arrival.

use call_protocol::{CameraUpdate, MicUpdate, ParticipantWire, ScreenshareUpdate};
use uuid::Uuid;

use crate::errors::SessionError;
use crate::media::{
    CaptureSource, DeviceKind, EncodingOptions, LocalTrack, MediaKind, MediaState, TrackRef,
};
use crate::participant::{ParticipantSnapshot, ScreenshareState};

/// A push the session should spawn against the media transport.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PushSpec {
    pub kind: MediaKind,
    pub track: LocalTrack,
    pub generation: u64,
    pub options: EncodingOptions,
}

/// A screenshare push: video plus optional audio under one generation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScreensharePushSpec {
    pub video: LocalTrack,
    pub audio: Option<LocalTrack>,
    pub generation: u64,
}

/// Publish state for one continuously-pushed kind (mic or camera).
#[derive(Debug)]
struct LocalPublisher {
    kind: MediaKind,
    enabled: bool,
    track_ref: Option<TrackRef>,
    device_id: Option<String>,
    generation: u64,
    /// Last `(enabled, ref)` pair broadcast, to suppress duplicates.
    last_sent: Option<(bool, Option<TrackRef>)>,
}

impl LocalPublisher {
    fn new(kind: MediaKind) -> Self {
        Self {
            kind,
            enabled: false,
            track_ref: None,
            device_id: None,
            generation: 0,
            // The initial disabled state is not broadcast.
            last_sent: Some((false, None)),
        }
    }

    fn options(&self) -> EncodingOptions {
        match self.kind {
            MediaKind::Camera => EncodingOptions::camera_simulcast(),
            MediaKind::Mic | MediaKind::Screenshare => EncodingOptions::default(),
        }
    }

    /// Re-publish `track`, superseding any in-flight push.
    fn publish(&mut self, track: LocalTrack) -> PushSpec {
        self.generation += 1;
        PushSpec {
            kind: self.kind,
            track,
            generation: self.generation,
            options: self.options(),
        }
    }

    fn accept_ref(&mut self, generation: u64, track_ref: TrackRef) -> bool {
        if generation != self.generation {
            return false;
        }
        self.track_ref = Some(track_ref);
        true
    }

    /// The full current pair if it differs from the last broadcast one.
    ///
    /// An enabled kind is announced only once its reference is known;
    /// a disabled kind is announced immediately with the reference
    /// cleared.
    fn pending_pair(&mut self) -> Option<(bool, Option<TrackRef>)> {
        let pair = if self.enabled {
            self.track_ref.clone().map(|r| (true, Some(r)))?
        } else {
            (false, None)
        };
        if self.last_sent.as_ref() == Some(&pair) {
            return None;
        }
        self.last_sent = Some(pair.clone());
        Some(pair)
    }
}

/// Local screenshare publish state; no placeholder is kept for it.
#[derive(Debug)]
struct LocalScreenshare {
    enabled: bool,
    video_ref: Option<TrackRef>,
    audio_ref: Option<TrackRef>,
    generation: u64,
    last_sent: Option<(bool, Option<TrackRef>, Option<TrackRef>)>,
}

impl LocalScreenshare {
    fn new() -> Self {
        Self {
            enabled: false,
            video_ref: None,
            audio_ref: None,
            generation: 0,
            last_sent: Some((false, None, None)),
        }
    }
}

/// The local participant: owns capture, device selection and the
/// continuous publish lifecycle; emits self-state for transmission.
#[derive(Debug)]
pub struct LocalParticipant {
    id: Uuid,
    name: String,
    devices: Vec<crate::media::DeviceInfo>,
    mic: LocalPublisher,
    camera: LocalPublisher,
    screenshare: LocalScreenshare,
}

impl LocalParticipant {
    /// Build the local participant and the initial placeholder pushes
    /// that warm the mic and camera publish channels.
    pub(crate) fn new(name: impl Into<String>, capture: &dyn CaptureSource) -> (Self, Vec<PushSpec>) {
        let mut participant = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            devices: capture.devices(),
            mic: LocalPublisher::new(MediaKind::Mic),
            camera: LocalPublisher::new(MediaKind::Camera),
            screenshare: LocalScreenshare::new(),
        };

        let pushes = vec![
            participant.mic.publish(capture.placeholder(MediaKind::Mic)),
            participant
                .camera
                .publish(capture.placeholder(MediaKind::Camera)),
        ];
        (participant, pushes)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last known capture device list.
    #[must_use]
    pub fn devices(&self) -> &[crate::media::DeviceInfo] {
        &self.devices
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

    /// Toggle the mic on: swap the published stream to live capture.
    pub(crate) fn start_mic(&mut self, capture: &dyn CaptureSource) -> Option<PushSpec> {
        if self.mic.enabled {
            return None;
        }
        self.mic.enabled = true;
        let track = capture.capture(MediaKind::Mic, self.mic.device_id.as_deref());
        Some(self.mic.publish(track))
    }

    /// Toggle the mic off: swap back to the placeholder, keeping the
    /// publish channel warm.
    pub(crate) fn stop_mic(&mut self, capture: &dyn CaptureSource) -> Option<PushSpec> {
        if !self.mic.enabled {
            return None;
        }
        self.mic.enabled = false;
        Some(self.mic.publish(capture.placeholder(MediaKind::Mic)))
    }

    pub(crate) fn start_camera(&mut self, capture: &dyn CaptureSource) -> Option<PushSpec> {
        if self.camera.enabled {
            return None;
        }
        self.camera.enabled = true;
        let track = capture.capture(MediaKind::Camera, self.camera.device_id.as_deref());
        Some(self.camera.publish(track))
    }

    pub(crate) fn stop_camera(&mut self, capture: &dyn CaptureSource) -> Option<PushSpec> {
        if !self.camera.enabled {
            return None;
        }
        self.camera.enabled = false;
        Some(self.camera.publish(capture.placeholder(MediaKind::Camera)))
    }

    /// Re-acquire mic capture from the requested device.
    ///
    /// # Errors
    ///
    /// Fails synchronously with [`SessionError::DeviceNotFound`] when
    /// the id is not in the last known device list; no default device
    /// is silently substituted.
    pub(crate) fn set_mic_device(
        &mut self,
        device_id: &str,
        capture: &dyn CaptureSource,
    ) -> Result<Option<PushSpec>, SessionError> {
        self.validate_device(device_id, DeviceKind::AudioInput)?;
        self.mic.device_id = Some(device_id.to_string());
        if !self.mic.enabled {
            return Ok(None);
        }
        let track = capture.capture(MediaKind::Mic, Some(device_id));
        Ok(Some(self.mic.publish(track)))
    }

    /// Re-acquire camera capture from the requested device.
    ///
    /// # Errors
    ///
    /// Fails synchronously with [`SessionError::DeviceNotFound`] when
    /// the id is not in the last known device list.
    pub(crate) fn set_camera_device(
        &mut self,
        device_id: &str,
        capture: &dyn CaptureSource,
    ) -> Result<Option<PushSpec>, SessionError> {
        self.validate_device(device_id, DeviceKind::VideoInput)?;
        self.camera.device_id = Some(device_id.to_string());
        if !self.camera.enabled {
            return Ok(None);
        }
        let track = capture.capture(MediaKind::Camera, Some(device_id));
        Ok(Some(self.camera.publish(track)))
    }

    fn validate_device(&self, device_id: &str, kind: DeviceKind) -> Result<(), SessionError> {
        let known = self
            .devices
            .iter()
            .any(|device| device.kind == kind && device.id == device_id);
        if known {
            Ok(())
        } else {
            Err(SessionError::DeviceNotFound(device_id.to_string()))
        }
    }

    pub(crate) fn start_screenshare(
        &mut self,
        capture: &dyn CaptureSource,
    ) -> Option<ScreensharePushSpec> {
        if self.screenshare.enabled {
            return None;
        }
        self.screenshare.enabled = true;
        self.screenshare.generation += 1;
        let sources = capture.screen_capture();
        Some(ScreensharePushSpec {
            video: sources.video,
            audio: sources.audio,
            generation: self.screenshare.generation,
        })
    }

    /// Stop screenshare; references clear atomically with the flag and
    /// any in-flight publish is superseded.
    pub(crate) fn stop_screenshare(&mut self) {
        if !self.screenshare.enabled {
            return;
        }
        self.screenshare.enabled = false;
        self.screenshare.generation += 1;
        self.screenshare.video_ref = None;
        self.screenshare.audio_ref = None;
    }

    /// Accept a mic/camera push result if its generation is current.
    pub(crate) fn accept_push(
        &mut self,
        kind: MediaKind,
        generation: u64,
        track_ref: TrackRef,
    ) -> bool {
        match kind {
            MediaKind::Mic => self.mic.accept_ref(generation, track_ref),
            MediaKind::Camera => self.camera.accept_ref(generation, track_ref),
            MediaKind::Screenshare => false,
        }
    }

    /// Accept a screenshare push result if its generation is current.
    pub(crate) fn accept_screenshare_push(
        &mut self,
        generation: u64,
        video_ref: TrackRef,
        audio_ref: Option<TrackRef>,
    ) -> bool {
        if generation != self.screenshare.generation || !self.screenshare.enabled {
            return false;
        }
        self.screenshare.video_ref = Some(video_ref);
        self.screenshare.audio_ref = audio_ref;
        true
    }

    /// The mic action to broadcast, if the full pair changed.
    pub(crate) fn pending_mic_action(&mut self) -> Option<MicUpdate> {
        self.mic.pending_pair().map(|(enabled, track_ref)| MicUpdate {
            mic_enabled: enabled,
            mic_track_id: track_ref.map(|r| r.0),
        })
    }

    /// The camera action to broadcast, if the full pair changed.
    pub(crate) fn pending_camera_action(&mut self) -> Option<CameraUpdate> {
        self.camera
            .pending_pair()
            .map(|(enabled, track_ref)| CameraUpdate {
                camera_enabled: enabled,
                camera_track_id: track_ref.map(|r| r.0),
            })
    }

    /// The screenshare action to broadcast, if its state changed.
    pub(crate) fn pending_screenshare_action(&mut self) -> Option<ScreenshareUpdate> {
        let state = if self.screenshare.enabled {
            let video_ref = self.screenshare.video_ref.clone()?;
            (true, Some(video_ref), self.screenshare.audio_ref.clone())
        } else {
            (false, None, None)
        };
        if self.screenshare.last_sent.as_ref() == Some(&state) {
            return None;
        }
        self.screenshare.last_sent = Some(state.clone());
        let (enabled, video_ref, audio_ref) = state;
        Some(ScreenshareUpdate {
            screenshare_enabled: enabled,
            screenshare_video_track_id: video_ref.map(|r| r.0),
            screenshare_audio_track_id: audio_ref.map(|r| r.0),
        })
    }

    /// Point-in-time public state; local capture handles are not
    /// exposed, only enabled flags and published references.
    #[must_use]
    pub fn snapshot(&self) -> ParticipantSnapshot {
        let publisher_state = |publisher: &LocalPublisher| {
            if !publisher.enabled {
                MediaState::disabled()
            } else if let Some(track_ref) = &publisher.track_ref {
                MediaState::resolving(track_ref.clone())
            } else {
                MediaState::enabling()
            }
        };
        ParticipantSnapshot {
            id: self.id,
            name: self.name.clone(),
            mic: publisher_state(&self.mic),
            camera: publisher_state(&self.camera),
            screenshare: ScreenshareState {
                enabled: self.screenshare.enabled,
                video_ref: self.screenshare.video_ref.clone(),
                audio_ref: self.screenshare.audio_ref.clone(),
                video_track: None,
                audio_track: None,
            },
            volume_level: 0,
        }
    }

    /// The self state sent in the `join` action.
    #[must_use]
    pub fn to_wire(&self) -> ParticipantWire {
        self.snapshot().to_wire()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::FakeCaptureSource;

    fn local() -> (LocalParticipant, Vec<PushSpec>, FakeCaptureSource) {
        let capture = FakeCaptureSource::new();
        let (participant, pushes) = LocalParticipant::new("Ada", &capture);
        (participant, pushes, capture)
    }

    #[test]
    fn test_construction_warms_mic_and_camera_channels() {
        let (_, pushes, _) = local();
        assert_eq!(pushes.len(), 2);
        assert!(pushes.iter().all(|push| push.track.placeholder));
        let camera = pushes
            .iter()
            .find(|push| push.kind == MediaKind::Camera)
            .unwrap();
        assert_eq!(camera.options, EncodingOptions::camera_simulcast());
    }

    #[test]
    fn test_initial_state_is_not_broadcast() {
        let (mut participant, _, _) = local();
        assert!(participant.pending_mic_action().is_none());
        assert!(participant.pending_camera_action().is_none());
        assert!(participant.pending_screenshare_action().is_none());
    }

    #[test]
    fn test_start_mic_broadcasts_full_pair_once_ref_is_known() {
        let (mut participant, _, capture) = local();

        let push = participant.start_mic(&capture).unwrap();
        assert!(!push.track.placeholder);
        // Reference not known yet: nothing to broadcast (never partial).
        assert!(participant.pending_mic_action().is_none());

        assert!(participant.accept_push(
            MediaKind::Mic,
            push.generation,
            TrackRef("s:mic".to_string())
        ));
        let action = participant.pending_mic_action().unwrap();
        assert!(action.mic_enabled);
        assert_eq!(action.mic_track_id.as_deref(), Some("s:mic"));

        // Unchanged pair is not re-broadcast.
        assert!(participant.pending_mic_action().is_none());
    }

    #[test]
    fn test_stop_mic_broadcasts_disabled_and_keeps_channel_warm() {
        let (mut participant, _, capture) = local();
        let push = participant.start_mic(&capture).unwrap();
        participant.accept_push(MediaKind::Mic, push.generation, TrackRef("s:mic".to_string()));
        let _ = participant.pending_mic_action();

        let placeholder_push = participant.stop_mic(&capture).unwrap();
        assert!(placeholder_push.track.placeholder);

        let action = participant.pending_mic_action().unwrap();
        assert!(!action.mic_enabled);
        assert!(action.mic_track_id.is_none());
    }

    #[test]
    fn test_stale_push_result_is_discarded() {
        let (mut participant, _, capture) = local();
        let first = participant.start_camera(&capture).unwrap();
        // Superseded by a stop before the push resolves.
        let second = participant.stop_camera(&capture).unwrap();

        assert!(!participant.accept_push(
            MediaKind::Camera,
            first.generation,
            TrackRef("s:v1".to_string())
        ));
        assert!(participant.accept_push(
            MediaKind::Camera,
            second.generation,
            TrackRef("s:v2".to_string())
        ));
    }

    #[test]
    fn test_unknown_device_fails_synchronously() {
        let (mut participant, _, capture) = local();
        let result = participant.set_mic_device("no-such-device", &capture);
        assert!(matches!(result, Err(SessionError::DeviceNotFound(id)) if id == "no-such-device"));
        // State untouched.
        assert!(!participant.mic_enabled());
    }

    #[test]
    fn test_device_switch_republishes_while_enabled() {
        let (mut participant, _, capture) = local();
        let _ = participant.start_mic(&capture);

        let push = participant
            .set_mic_device(FakeCaptureSource::MIC_DEVICE, &capture)
            .unwrap()
            .unwrap();
        assert_eq!(
            push.track.device_id.as_deref(),
            Some(FakeCaptureSource::MIC_DEVICE)
        );
    }

    #[test]
    fn test_device_switch_while_disabled_only_records_choice() {
        let (mut participant, _, capture) = local();
        let push = participant
            .set_camera_device(FakeCaptureSource::CAMERA_DEVICE, &capture)
            .unwrap();
        assert!(push.is_none());

        // The recorded device is used at the next start.
        let push = participant.start_camera(&capture).unwrap();
        assert_eq!(
            push.track.device_id.as_deref(),
            Some(FakeCaptureSource::CAMERA_DEVICE)
        );
    }

    #[test]
    fn test_screenshare_pair_travels_together() {
        let (mut participant, _, capture) = local();
        let push = participant.start_screenshare(&capture).unwrap();
        assert!(participant.pending_screenshare_action().is_none());

        assert!(participant.accept_screenshare_push(
            push.generation,
            TrackRef("s:sv".to_string()),
            Some(TrackRef("s:sa".to_string())),
        ));
        let action = participant.pending_screenshare_action().unwrap();
        assert!(action.screenshare_enabled);
        assert_eq!(action.screenshare_video_track_id.as_deref(), Some("s:sv"));
        assert_eq!(action.screenshare_audio_track_id.as_deref(), Some("s:sa"));

        participant.stop_screenshare();
        let action = participant.pending_screenshare_action().unwrap();
        assert!(!action.screenshare_enabled);
        assert!(action.screenshare_video_track_id.is_none());
    }

    #[test]
    fn test_join_wire_carries_refs_only_while_enabled() {
        let (mut participant, pushes, capture) = local();
        // Placeholder refs resolve but the kinds stay disabled.
        for push in pushes {
            participant.accept_push(push.kind, push.generation, TrackRef("s:warm".to_string()));
        }
        let wire = participant.to_wire();
        assert!(!wire.mic_enabled);
        assert!(wire.mic_track_id.is_none());

        let push = participant.start_mic(&capture).unwrap();
        participant.accept_push(MediaKind::Mic, push.generation, TrackRef("s:mic".to_string()));
        let wire = participant.to_wire();
        assert!(wire.mic_enabled);
        assert_eq!(wire.mic_track_id.as_deref(), Some("s:mic"));
    }
}
