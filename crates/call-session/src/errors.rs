//! Session error types.
//!
//! Only device selection and transport connectivity are user-visible
//! failures. Roster churn, volume jitter, stage reshuffles and
//! stale/duplicate signaling are absorbed by the core and never surface
//! as errors.

use thiserror::Error;

/// Client session error type.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The requested capture device id is not in the last known device
    /// list. Raised synchronously; no default device is substituted.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The signaling transport failed or closed underneath the session.
    /// Retry policy belongs to the transport, not the core.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A media transport push/pull operation failed.
    #[error("Media transport error: {0}")]
    Media(String),

    /// The session actor is gone (mailbox or reply channel closed).
    #[error("Session closed")]
    Closed,
}
