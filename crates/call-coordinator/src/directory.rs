//! Room lookup and spawn.
//!
//! Rooms are created on first connect and removed lazily: a room whose
//! actor shut down (empty-grace sweep or cancellation) is replaced by a
//! fresh actor on the next connect, which reloads any persisted state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::room::{RoomActor, RoomHandle};
use crate::storage::RoomStorage;

/// Per-process registry of live rooms.
pub struct RoomDirectory {
    storage: Arc<dyn RoomStorage>,
    empty_grace: Duration,
    cancel_token: CancellationToken,
    rooms: Mutex<HashMap<String, RoomHandle>>,
}

impl RoomDirectory {
    #[must_use]
    pub fn new(
        storage: Arc<dyn RoomStorage>,
        empty_grace: Duration,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            storage,
            empty_grace,
            cancel_token,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for `room_id`, spawning the actor if none is live.
    #[must_use]
    pub fn room(&self, room_id: &str) -> RoomHandle {
        let mut rooms = match self.rooms.lock() {
            Ok(rooms) => rooms,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = rooms.get(room_id) {
            if !handle.is_cancelled() {
                return handle.clone();
            }
            debug!(
                target: "call.directory",
                room_id = %room_id,
                "Pruning shut-down room"
            );
            rooms.remove(room_id);
        }

        info!(target: "call.directory", room_id = %room_id, "Spawning room");
        let (handle, _task) = RoomActor::spawn(
            room_id,
            Arc::clone(&self.storage),
            self.empty_grace,
            self.cancel_token.child_token(),
        );
        rooms.insert(room_id.to_string(), handle.clone());
        handle
    }

    /// Number of live rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        match self.rooms.lock() {
            Ok(rooms) => rooms.values().filter(|h| !h.is_cancelled()).count(),
            Err(_) => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn directory() -> RoomDirectory {
        RoomDirectory::new(
            Arc::new(MemoryStorage::new()),
            Duration::from_secs(30),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_same_id_returns_same_room() {
        let directory = directory();
        let first = directory.room("room-1");
        let second = directory.room("room-1");
        assert_eq!(first.room_id(), second.room_id());
        assert_eq!(directory.len(), 1);

        let other = directory.room("room-2");
        assert_eq!(other.room_id(), "room-2");
        assert_eq!(directory.len(), 2);
    }

    #[tokio::test]
    async fn test_shut_down_room_is_respawned() {
        let directory = directory();
        let first = directory.room("room-1");
        first.cancel();

        let second = directory.room("room-1");
        assert!(!second.is_cancelled());
        assert_eq!(directory.len(), 1);
    }
}
