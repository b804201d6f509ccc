//! SQLite-backed local state
//!
//! One row per key. Writes are upserts, so the latest value always wins.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::{KeyValueStore, StorageError};
use crate::utils::{acquire_lock, now_millis};

/// SQLite-backed key/value store
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create or open the store at ~/.config/nura/local_state.db
    pub fn open_default() -> Result<Self, StorageError> {
        let db_path = Self::default_path()?;
        Self::open(&db_path)
    }

    /// Create or open the store at a specific path
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Backend(format!("Failed to create data dir: {}", e))
            })?;
        }

        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Volatile database, mostly for tests
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS local_state (
                key TEXT PRIMARY KEY NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn default_path() -> Result<PathBuf, StorageError> {
        dirs::config_dir()
            .map(|d| d.join("nura").join("local_state.db"))
            .ok_or_else(|| StorageError::Backend("Could not determine config directory".into()))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = acquire_lock(&self.conn);
        let value = conn
            .query_row(
                "SELECT value FROM local_state WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let conn = acquire_lock(&self.conn);
        conn.execute(
            r#"
            INSERT INTO local_state (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, now_millis()],
        )?;

        debug!(key, "Persisted local state");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = acquire_lock(&self.conn);
        conn.execute("DELETE FROM local_state WHERE key = ?", params![key])?;
        Ok(())
    }
}
