//! Fake media collaborators for tests.
//!
//! `FakeMediaTransport` resolves pushes and pulls after a configurable
//! delay (driven by the tokio test clock when paused) and lets tests
//! set per-track RMS levels to exercise volume sampling and stage
//! ranking. `FakeCaptureSource` hands out deterministic capture tracks
//! and a fixed device list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::media::{
    AudioSource, CaptureSource, DeviceInfo, DeviceKind, EncodingOptions, LocalTrack, MediaKind,
    MediaTrack, MediaTransport, MediaTransportError, PullOptions, ScreenCapture, TrackRef,
};

/// Audio source backed by a shared mutable level table.
#[derive(Debug)]
struct FakeAudioSource {
    track_id: String,
    levels: Arc<Mutex<HashMap<String, f32>>>,
}

impl AudioSource for FakeAudioSource {
    fn sample_rms(&self) -> f32 {
        self.levels
            .lock()
            .ok()
            .and_then(|levels| levels.get(&self.track_id).copied())
            .unwrap_or(0.0)
    }
}

/// In-memory media transport with configurable latencies.
///
/// Pushes model a persistent publish channel: re-pushing the same kind
/// yields the same stable reference, the way a warm channel keeps its
/// identity while its content is swapped.
#[derive(Debug)]
pub struct FakeMediaTransport {
    prefix: String,
    push_delay: Duration,
    pull_delay: Duration,
    levels: Arc<Mutex<HashMap<String, f32>>>,
}

impl FakeMediaTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::with_delays(Duration::ZERO, Duration::ZERO)
    }

    /// A transport whose track references carry `prefix`, so tests with
    /// several clients can tell their published tracks apart.
    #[must_use]
    pub fn named(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Self::new()
        }
    }

    #[must_use]
    pub fn with_delays(push_delay: Duration, pull_delay: Duration) -> Self {
        Self {
            prefix: "fake".to_string(),
            push_delay,
            pull_delay,
            levels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Set the RMS amplitude sampled from a pulled track.
    pub fn set_rms(&self, track_id: &str, rms: f32) {
        if let Ok(mut levels) = self.levels.lock() {
            levels.insert(track_id.to_string(), rms);
        }
    }
}

impl Default for FakeMediaTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaTransport for FakeMediaTransport {
    async fn push(
        &self,
        track: LocalTrack,
        _options: EncodingOptions,
    ) -> Result<TrackRef, MediaTransportError> {
        tokio::time::sleep(self.push_delay).await;
        Ok(TrackRef(format!("{}:{}", self.prefix, track.kind)))
    }

    async fn pull(
        &self,
        track_ref: TrackRef,
        _options: PullOptions,
    ) -> Result<MediaTrack, MediaTransportError> {
        tokio::time::sleep(self.pull_delay).await;
        let audio: Arc<dyn AudioSource> = Arc::new(FakeAudioSource {
            track_id: track_ref.0.clone(),
            levels: Arc::clone(&self.levels),
        });
        Ok(MediaTrack::new(track_ref, Some(audio)))
    }
}

/// Deterministic capture source with one mic and one camera device.
#[derive(Debug, Default)]
pub struct FakeCaptureSource;

impl FakeCaptureSource {
    pub const MIC_DEVICE: &'static str = "fake-mic-0";
    pub const CAMERA_DEVICE: &'static str = "fake-camera-0";

    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CaptureSource for FakeCaptureSource {
    fn devices(&self) -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                id: Self::MIC_DEVICE.to_string(),
                label: "Fake Microphone".to_string(),
                kind: DeviceKind::AudioInput,
            },
            DeviceInfo {
                id: Self::CAMERA_DEVICE.to_string(),
                label: "Fake Camera".to_string(),
                kind: DeviceKind::VideoInput,
            },
        ]
    }

    fn capture(&self, kind: MediaKind, device_id: Option<&str>) -> LocalTrack {
        LocalTrack {
            kind,
            device_id: device_id.map(ToString::to_string),
            placeholder: false,
        }
    }

    fn placeholder(&self, kind: MediaKind) -> LocalTrack {
        LocalTrack {
            kind,
            device_id: None,
            placeholder: true,
        }
    }

    fn screen_capture(&self) -> ScreenCapture {
        ScreenCapture {
            video: LocalTrack {
                kind: MediaKind::Screenshare,
                device_id: None,
                placeholder: false,
            },
            audio: Some(LocalTrack {
                kind: MediaKind::Screenshare,
                device_id: None,
                placeholder: false,
            }),
        }
    }
}
