//! Client session configuration.
//!
//! Configuration is passed explicitly into the session constructor;
//! there is no ambient context. The error callback is redacted in Debug
//! output.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::SessionError;

/// Default total stage slots, including the reserved local self view.
pub const DEFAULT_MAX_STAGE_PARTICIPANTS: usize = 7;

/// Default stage recompute interval.
pub const DEFAULT_STAGE_INTERVAL: Duration = Duration::from_millis(600);

/// Default volume sampling interval.
pub const DEFAULT_VOLUME_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked for transport and media failures.
pub type ErrorCallback = Arc<dyn Fn(&SessionError) + Send + Sync>;

/// Default media toggles applied when the session starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaDefaults {
    pub audio: bool,
    pub video: bool,
}

/// Preferred receive quality for remote camera video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoQuality {
    /// Half-resolution simulcast layer.
    Low,
    /// Full-rate simulcast layer.
    Standard,
    /// Uncapped source layer.
    #[default]
    Full,
}

impl VideoQuality {
    /// The simulcast rid requested from the media transport.
    #[must_use]
    pub fn rid(self) -> &'static str {
        match self {
            VideoQuality::Low => "b",
            VideoQuality::Standard => "a",
            VideoQuality::Full => "f",
        }
    }
}

/// Call session configuration.
#[derive(Clone)]
pub struct CallConfig {
    /// Room id to join.
    pub room: String,

    /// Display name announced to other participants.
    pub display_name: String,

    /// Media toggles applied at session start.
    pub defaults: MediaDefaults,

    /// Total stage slots including the local self view; the remote
    /// stage capacity is one less.
    pub max_stage_participants: usize,

    /// Preferred receive quality for remote camera video.
    pub video_quality: VideoQuality,

    /// Signaling socket base endpoint.
    pub socket_url: String,

    /// Media/API base endpoint.
    pub api_url: String,

    /// Tracing filter directive for the embedding application, e.g.
    /// `"call_session=debug"`.
    pub log_filter: Option<String>,

    /// Automatically invoke `join()` upon reaching `Connected`.
    pub auto_join: bool,

    /// Stage recompute interval.
    pub stage_interval: Duration,

    /// Volume sampling interval.
    pub volume_interval: Duration,

    /// Invoked for transport and media failures; the core never retries
    /// on its own.
    pub on_error: Option<ErrorCallback>,
}

impl CallConfig {
    /// Configuration with defaults for everything but room and name.
    #[must_use]
    pub fn new(room: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            display_name: display_name.into(),
            defaults: MediaDefaults::default(),
            max_stage_participants: DEFAULT_MAX_STAGE_PARTICIPANTS,
            video_quality: VideoQuality::default(),
            socket_url: String::new(),
            api_url: String::new(),
            log_filter: None,
            auto_join: false,
            stage_interval: DEFAULT_STAGE_INTERVAL,
            volume_interval: DEFAULT_VOLUME_INTERVAL,
            on_error: None,
        }
    }

    /// Remote stage capacity: one slot is reserved for the self view.
    #[must_use]
    pub fn stage_capacity(&self) -> usize {
        self.max_stage_participants.saturating_sub(1)
    }
}

/// Custom Debug implementation; the error callback is not printable.
impl fmt::Debug for CallConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallConfig")
            .field("room", &self.room)
            .field("display_name", &self.display_name)
            .field("defaults", &self.defaults)
            .field("max_stage_participants", &self.max_stage_participants)
            .field("video_quality", &self.video_quality)
            .field("socket_url", &self.socket_url)
            .field("api_url", &self.api_url)
            .field("log_filter", &self.log_filter)
            .field("auto_join", &self.auto_join)
            .field("stage_interval", &self.stage_interval)
            .field("volume_interval", &self.volume_interval)
            .field("on_error", &self.on_error.as_ref().map(|_| "[callback]"))
            .finish()
    }
}
