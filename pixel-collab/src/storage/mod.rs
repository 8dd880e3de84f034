//! Durable storage for the canonical grid snapshot.
//!
//! ```text
//! ┌─────────────┐   set("pixels", json)  ┌──────────────────────────────┐
//! │ SyncServer  │ ─────────────────────► │ GridStore                    │
//! │ (cache)     │ ◄───────────────────── │  RocksGridStore  (durable)   │
//! └─────────────┘   get("pixels")        │  RedisGridStore  (network)   │
//!                                        │  MemoryGridStore (tests/dev) │
//!                                        └──────────────────────────────┘
//! ```
//!
//! The store is an opaque key-value holder: the server hands it the
//! serialized grid and never relies on anything but get/set of one key.

pub mod redis_store;
pub mod rocks;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::SystemTime;
use thiserror::Error;

pub use redis_store::{RedisConfig, RedisGridStore};
pub use rocks::{RocksGridStore, StoreConfig};

/// The single key the canvas lives under.
pub const GRID_KEY: &str = "pixels";

/// Storage errors.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Compression error: {0}")]
    CompressionError(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Bookkeeping written alongside every value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub key: String,
    /// Number of successful writes to this key, starting at 1.
    pub version: u64,
    /// Uncompressed value size in bytes
    pub raw_size: u64,
    /// Stored size in bytes
    pub stored_size: u64,
    /// Seconds since epoch
    pub updated_at: u64,
}

impl StoreMetadata {
    pub(crate) fn next(previous: Option<&StoreMetadata>, key: &str, raw: usize, stored: usize) -> Self {
        Self {
            key: key.to_string(),
            version: previous.map_or(1, |m| m.version + 1),
            raw_size: raw as u64,
            stored_size: stored as u64,
            updated_at: unix_now(),
        }
    }

    pub(crate) fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::SerializationError(e.to_string()))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
        Ok(meta)
    }
}

/// Whole-value key-value storage.
///
/// Implementations are blocking; the server calls them from
/// `spawn_blocking` so a slow disk never stalls the event loop.
pub trait GridStore: Send + Sync + 'static {
    /// Read the value under `key`. A missing key is `Ok(None)`, not an error.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replace the value under `key`. Returns once the write is durable.
    fn set(&self, key: &str, value: &[u8]) -> Result<StoreMetadata, StoreError>;

    /// Metadata for `key`, if it has ever been written.
    fn metadata(&self, key: &str) -> Result<Option<StoreMetadata>, StoreError>;
}

/// In-process store. Contents are lost when the process exits.
#[derive(Default)]
pub struct MemoryGridStore {
    entries: RwLock<HashMap<String, (Vec<u8>, StoreMetadata)>>,
}

impl MemoryGridStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GridStore for MemoryGridStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<StoreMetadata, StoreError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;
        let meta = StoreMetadata::next(entries.get(key).map(|(_, m)| m), key, value.len(), value.len());
        entries.insert(key.to_string(), (value.to_vec(), meta.clone()));
        Ok(meta)
    }

    fn metadata(&self, key: &str) -> Result<Option<StoreMetadata>, StoreError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".into()))?;
        Ok(entries.get(key).map(|(_, m)| m.clone()))
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_missing_key() {
        let store = MemoryGridStore::new();
        assert_eq!(store.get(GRID_KEY).unwrap(), None);
        assert_eq!(store.metadata(GRID_KEY).unwrap(), None);
    }

    #[test]
    fn test_memory_store_overwrite_bumps_version() {
        let store = MemoryGridStore::new();
        let first = store.set(GRID_KEY, b"one").unwrap();
        let second = store.set(GRID_KEY, b"second").unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(second.raw_size, 6);
        assert_eq!(store.get(GRID_KEY).unwrap().unwrap(), b"second");
    }

    #[test]
    fn test_metadata_bincode_roundtrip() {
        let meta = StoreMetadata::next(None, GRID_KEY, 100, 40);
        let decoded = StoreMetadata::decode(&meta.encode().unwrap()).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Unavailable("connection refused".into());
        assert!(err.to_string().contains("unavailable"));

        let err = StoreError::DatabaseError("test".into());
        assert!(err.to_string().contains("Database error"));
    }
}
