//! Callskit session coordinator.
//!
//! The server side of a call: one actor per room owns the
//! authoritative roster and chat log, applies client actions,
//! rebroadcasts events to the room and persists state so a restart can
//! reload it.
//!
//! # Architecture
//!
//! ```text
//! RoomDirectory (per process)
//! └── RoomActor (one task per room)
//!     ├── roster: join-ordered participant records
//!     ├── chat: append-only message log
//!     └── RoomStorage - pluggable durable backend
//! ```
//!
//! Rooms never share mutable state: each `RoomActor` is the single
//! writer for its room, so there is no lock-based contention across
//! rooms. The websocket adapter ([`ws`]) bridges JSON frames to room
//! mailboxes; undecodable frames are logged and dropped, never fatal.
//!
//! # Modules
//!
//! - [`room`] - per-room actor and handle
//! - [`directory`] - room lookup/spawn with lazy pruning
//! - [`storage`] - durable room state collaborator and memory impl
//! - [`ws`] - axum websocket transport adapter
//! - [`config`] - service configuration from environment
//! - [`errors`] - coordinator error types

#![warn(clippy::pedantic)]

pub mod config;
pub mod directory;
pub mod errors;
pub mod room;
pub mod storage;
pub mod ws;

pub use config::Config;
pub use directory::RoomDirectory;
pub use errors::CoordinatorError;
pub use room::{RoomActor, RoomHandle};
pub use storage::{MemoryStorage, RoomStorage};
