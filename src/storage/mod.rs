//! Local persisted state
//!
//! A synchronous key/value store standing in for browser local storage.
//! Values are strings; structured values are JSON-encoded through
//! [`read_json`] and [`write_json`]. Store operations never suspend.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Errors raised by a store backend
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend failed: {0}")]
    Backend(String),
    #[error("failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

/// Synchronous string key/value store
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Outcome of reading a JSON entry
#[derive(Debug, Clone, PartialEq)]
pub enum JsonEntry<T> {
    Missing,
    Corrupt,
    Present(T),
}

impl<T> JsonEntry<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Missing | Self::Corrupt => None,
        }
    }
}

/// Read and decode a JSON entry, classifying missing and corrupt values.
///
/// Backend errors are returned; decode failures are not errors.
pub fn read_json_entry<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<JsonEntry<T>, StorageError> {
    let Some(raw) = store.get(key)? else {
        return Ok(JsonEntry::Missing);
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Ok(JsonEntry::Present(value)),
        Err(e) => {
            warn!(key, error = %e, "Corrupt persisted entry");
            Ok(JsonEntry::Corrupt)
        }
    }
}

/// Read a JSON entry; missing, corrupt and unreadable entries are `None`
pub fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    match read_json_entry(store, key) {
        Ok(entry) => entry.into_option(),
        Err(e) => {
            warn!(key, error = %e, "Failed to read persisted entry");
            None
        }
    }
}

/// Encode and write a JSON entry
pub fn write_json<T: Serialize>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let encoded = serde_json::to_string(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    store.set(key, &encoded)
}
