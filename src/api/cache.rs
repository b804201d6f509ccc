//! Last successful directory payloads
//!
//! Entries are written after every successful fetch and only read when all
//! attempts for a fetch failed. There is no expiry unless a TTL is set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::directory::Endpoint;
use crate::storage::{read_json, write_json, KeyValueStore};
use crate::utils::now_millis;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    /// Capture time, unix ms
    #[serde(default)]
    ts: i64,
    data: Value,
}

/// Store-backed fallback cache, one entry per endpoint
pub struct DirectoryCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Option<Duration>,
}

impl DirectoryCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    /// Overwrite the entry for an endpoint
    pub fn save(&self, endpoint: Endpoint, data: &Value) {
        let entry = CacheEntry {
            ts: now_millis(),
            data: data.clone(),
        };
        if let Err(e) = write_json(self.store.as_ref(), endpoint.cache_key(), &entry) {
            warn!(endpoint = ?endpoint, error = %e, "Failed to cache directory payload");
        }
    }

    /// Cached payload, if present and not older than the TTL
    pub fn read(&self, endpoint: Endpoint) -> Option<Value> {
        let entry: CacheEntry = read_json(self.store.as_ref(), endpoint.cache_key())?;
        if entry.ts <= 0 {
            return None;
        }

        if let Some(ttl) = self.ttl {
            let age_ms = now_millis().saturating_sub(entry.ts);
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            if age_ms > ttl_ms {
                debug!(endpoint = ?endpoint, age_ms, "Cached directory payload expired");
                return None;
            }
        }

        Some(entry.data)
    }
}
