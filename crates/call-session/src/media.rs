//! Media collaborator contracts and media state.
//!
//! The core never touches raw frames or codecs. Publishing and
//! receiving tracks goes through the [`MediaTransport`] collaborator;
//! local capture (and the low-cost placeholder tracks that keep the
//! publish channel warm while a kind is disabled) goes through
//! [`CaptureSource`]. Both are injected into the session explicitly.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// A media kind, keyed independently per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Mic,
    Camera,
    Screenshare,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Mic => write!(f, "mic"),
            MediaKind::Camera => write!(f, "camera"),
            MediaKind::Screenshare => write!(f, "screenshare"),
        }
    }
}

/// Opaque correlation id for a published track, exchanged in signaling
/// so a remote peer can request the track from the media transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackRef(pub String);

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of coarse audio level samples for a live track.
///
/// Implemented by the media transport's track handles; the volume
/// estimator polls it on a fixed interval.
pub trait AudioSource: Send + Sync {
    /// Current time-domain RMS amplitude in `[0.0, 1.0]`.
    fn sample_rms(&self) -> f32;
}

/// A live media track delivered by the media transport.
///
/// The handle is opaque to the core: it is forwarded to consumers via
/// media-update events and, for audio, sampled for volume.
#[derive(Clone)]
pub struct MediaTrack {
    id: TrackRef,
    audio: Option<Arc<dyn AudioSource>>,
}

impl MediaTrack {
    #[must_use]
    pub fn new(id: TrackRef, audio: Option<Arc<dyn AudioSource>>) -> Self {
        Self { id, audio }
    }

    #[must_use]
    pub fn id(&self) -> &TrackRef {
        &self.id
    }

    #[must_use]
    pub fn audio(&self) -> Option<&Arc<dyn AudioSource>> {
        self.audio.as_ref()
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("has_audio", &self.audio.is_some())
            .finish()
    }
}

/// A locally captured track stream, continuously pushed to the media
/// transport. `placeholder` tracks are silent audio / blank video kept
/// running so the publish pipeline resumes instantly on toggle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub kind: MediaKind,
    pub device_id: Option<String>,
    pub placeholder: bool,
}

/// One simulcast encoding layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingLayer {
    pub rid: &'static str,
    pub max_bitrate: u32,
    pub max_framerate: f64,
    pub scale_resolution_down_by: Option<f64>,
}

/// Encoding options for a push.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodingOptions {
    pub layers: Vec<EncodingLayer>,
}

impl EncodingOptions {
    /// Simulcast preset for camera publishes: a half-resolution layer
    /// capped at 500 kbps / 24 fps and a full layer at 1.3 Mbps / 30 fps.
    #[must_use]
    pub fn camera_simulcast() -> Self {
        Self {
            layers: vec![
                EncodingLayer {
                    rid: "b",
                    max_bitrate: 500_000,
                    max_framerate: 24.0,
                    scale_resolution_down_by: Some(2.0),
                },
                EncodingLayer {
                    rid: "a",
                    max_bitrate: 1_300_000,
                    max_framerate: 30.0,
                    scale_resolution_down_by: None,
                },
            ],
        }
    }
}

/// Options for a pull; `preferred_rid` selects the receive layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullOptions {
    pub preferred_rid: Option<&'static str>,
}

/// Error from the media transport collaborator.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MediaTransportError(pub String);

/// External collaborator responsible for actual track transport.
///
/// Both calls are asynchronous and may be in flight while newer session
/// state supersedes them; callers guard results with generation tokens.
#[async_trait]
pub trait MediaTransport: Send + Sync + 'static {
    /// Publish a local track stream; resolves to its track reference.
    async fn push(
        &self,
        track: LocalTrack,
        options: EncodingOptions,
    ) -> Result<TrackRef, MediaTransportError>;

    /// Request a remote track by reference.
    async fn pull(
        &self,
        track_ref: TrackRef,
        options: PullOptions,
    ) -> Result<MediaTrack, MediaTransportError>;
}

/// Kind of a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
}

/// One entry of the known capture device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub kind: DeviceKind,
}

/// A captured screenshare source: screen video plus optional audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenCapture {
    pub video: LocalTrack,
    pub audio: Option<LocalTrack>,
}

/// External collaborator for local capture and device listing.
pub trait CaptureSource: Send + Sync + 'static {
    /// Last known capture device list.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Begin continuous capture of `kind` from `device_id` (or the
    /// default device when `None`).
    fn capture(&self, kind: MediaKind, device_id: Option<&str>) -> LocalTrack;

    /// A low-cost placeholder stream for `kind` (silent audio or blank
    /// video) that keeps the publish channel warm while disabled.
    fn placeholder(&self, kind: MediaKind) -> LocalTrack;

    /// Begin screen capture.
    fn screen_capture(&self) -> ScreenCapture;
}

/// Atomic per-kind media state: enabled flag, track reference and
/// resolved track move together; consumers can never observe a torn
/// pair such as an enabled kind holding a stale reference.
#[derive(Debug, Clone, Default)]
pub struct MediaState {
    enabled: bool,
    track_ref: Option<TrackRef>,
    track: Option<MediaTrack>,
}

impl MediaState {
    /// Disabled state; reference and track are cleared together.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Enabled, reference not yet known.
    #[must_use]
    pub fn enabling() -> Self {
        Self {
            enabled: true,
            track_ref: None,
            track: None,
        }
    }

    /// Enabled with a known reference, pull not yet resolved.
    #[must_use]
    pub fn resolving(track_ref: TrackRef) -> Self {
        Self {
            enabled: true,
            track_ref: Some(track_ref),
            track: None,
        }
    }

    /// Enabled with a resolved live track.
    #[must_use]
    pub fn active(track_ref: TrackRef, track: MediaTrack) -> Self {
        Self {
            enabled: true,
            track_ref: Some(track_ref),
            track: Some(track),
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn track_ref(&self) -> Option<&TrackRef> {
        self.track_ref.as_ref()
    }

    #[must_use]
    pub fn track(&self) -> Option<&MediaTrack> {
        self.track.as_ref()
    }
}
