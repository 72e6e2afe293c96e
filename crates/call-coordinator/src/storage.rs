//! Durable room state collaborator.
//!
//! Rooms persist their roster, chat log and start time so a process
//! restart reloads them. The backend is pluggable behind [`RoomStorage`];
//! [`MemoryStorage`] is the in-process implementation used by tests and
//! the default binary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// Error from the storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable key/value storage for room state.
///
/// Keys are namespaced by room id by the caller; values are JSON.
#[async_trait]
pub trait RoomStorage: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RoomStorage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete_round_trip() {
        let storage = MemoryStorage::new();
        assert!(storage.get("room-1:chat").await.unwrap().is_none());

        storage
            .put("room-1:chat", json!([{"message": "hi"}]))
            .await
            .unwrap();
        let value = storage.get("room-1:chat").await.unwrap().unwrap();
        assert_eq!(value, json!([{"message": "hi"}]));

        storage.delete("room-1:chat").await.unwrap();
        assert!(storage.get("room-1:chat").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let storage = MemoryStorage::new();
        storage.put("room-1:roster", json!([])).await.unwrap();
        storage.put("room-2:roster", json!([1])).await.unwrap();
        storage.delete("room-1:roster").await.unwrap();
        assert!(storage.get("room-2:roster").await.unwrap().is_some());
    }
}
