//! Callskit client session core.
//!
//! This crate implements the client side of a multi-participant
//! real-time call: it synchronizes a dynamic roster of participants and
//! their media-availability state over a lightweight signaling channel,
//! and decides - under a hard capacity limit - which participants
//! receive a visible "stage" slot, reacting to join/leave churn and
//! live speaking volume.
//!
//! # Architecture
//!
//! One actor task per call session owns all mutable session state:
//!
//! ```text
//! CallSession (actor, one task per session)
//! ├── LocalParticipant    - local capture + always-warm publish channel
//! ├── ParticipantRegistry - join-ordered collection of RemoteParticipant
//! │   └── RemoteParticipant - per-kind Idle/Enabling/Resolving/Active
//! ├── StageSelector       - bounded volume-ranked admission with fairness
//! ├── VolumeEstimator     - periodic coarse audio-level sampling
//! └── CallChat            - append-only chat log
//! ```
//!
//! A cloneable [`session::CallSessionHandle`] exposes the public API via
//! message passing; consumers observe the session through the typed
//! event bus ([`events::EventBus`]).
//!
//! # Key Design Decisions
//!
//! - **Single writer**: session state is mutated only by the actor task;
//!   every other component reads snapshots or subscribes to events.
//! - **Generation tokens**: every asynchronous media push/pull carries a
//!   per-kind monotonic generation; stale results are discarded on
//!   arrival, so rapid toggling can never surface a superseded track.
//! - **Full-state replacement**: media updates replace the whole
//!   per-kind state, which makes replayed or duplicated signaling
//!   messages harmless.

#![warn(clippy::pedantic)]

pub mod chat;
pub mod config;
pub mod errors;
pub mod events;
pub mod local;
pub mod media;
pub mod participant;
pub mod registry;
pub mod session;
pub mod stage;
pub mod volume;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{CallConfig, MediaDefaults, VideoQuality};
pub use errors::SessionError;
pub use events::{SessionEvent, SessionEventKind};
pub use session::{CallSession, CallSessionHandle, SessionState, SignalingChannel};
