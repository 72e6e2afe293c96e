//! Callskit signaling protocol.
//!
//! This crate defines the closed message set exchanged between call
//! clients and the session coordinator over one persistent, ordered
//! connection per (room, participant). Messages are JSON on the wire,
//! single-purpose, and idempotent when replayed: every `*-update` event
//! carries a full replacement of the affected media state, never a diff,
//! so a dropped or duplicated frame can never leave peers permanently
//! inconsistent.
//!
//! # Message flow
//!
//! ```text
//! client ──ClientAction──▶ coordinator ──ServerEvent──▶ other clients
//! ```
//!
//! # Modules
//!
//! - [`action`] - client → coordinator actions
//! - [`event`] - coordinator → client events
//! - [`chat`] - chat message model (append-only log entries)
//! - [`participant`] - serialized participant media state
//! - [`codec`] - JSON encode/decode helpers

#![warn(clippy::pedantic)]

pub mod action;
pub mod chat;
pub mod codec;
pub mod event;
pub mod participant;

pub use action::ClientAction;
pub use chat::{ChatMessage, ChatPayload};
pub use codec::{decode_action, decode_event, encode_action, encode_event, ProtocolError};
pub use event::{
    ParticipantCameraUpdate, ParticipantMicUpdate, ParticipantScreenshareUpdate, ServerEvent,
};
pub use participant::{CameraUpdate, MicUpdate, ParticipantWire, ScreenshareUpdate};
