//! Per-feature usage ledger
//!
//! Each feature has one persisted record `{windowId, used}`. Rollover is lazy:
//! a record from a previous window is replaced with a zeroed one the first
//! time it is read, so there is no background timer.
//!
//! All operations on one ledger are serialized by the mirror lock, which also
//! keeps the last record per feature in memory. When the store cannot be
//! written the mirror stays authoritative for the rest of the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::types::{FeatureKey, FeatureLimit, FeatureLimits, FreeStats, UsageRecord};
use super::window::{ResetInfo, WindowClock};
use crate::storage::{read_json_entry, write_json, JsonEntry, KeyValueStore};
use crate::utils::acquire_lock;

#[derive(Debug, Clone)]
struct MirrorEntry {
    record: UsageRecord,
    /// Last write to the store failed; the mirror is newer than the store
    dirty: bool,
}

type Mirror = HashMap<FeatureKey, MirrorEntry>;

/// Store-backed usage counters with a change version
pub struct UsageLedger {
    store: Arc<dyn KeyValueStore>,
    windows: WindowClock,
    limits: FeatureLimits,
    mirror: Mutex<Mirror>,
    version: watch::Sender<u64>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, windows: WindowClock, limits: FeatureLimits) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            store,
            windows,
            limits,
            mirror: Mutex::new(HashMap::new()),
            version,
        }
    }

    pub fn limits(&self) -> &FeatureLimits {
        &self.limits
    }

    pub fn limit(&self, feature: FeatureKey) -> FeatureLimit {
        self.limits.get(feature)
    }

    /// Current record, rolled over to the current window if needed
    pub fn get_usage(&self, feature: FeatureKey) -> UsageRecord {
        let mut mirror = acquire_lock(&self.mirror);
        self.load(feature, &mut mirror)
    }

    /// Overwrite the count for the current window
    pub fn set_usage(&self, feature: FeatureKey, used: u32) -> UsageRecord {
        let mut mirror = acquire_lock(&self.mirror);
        let record = UsageRecord {
            window_id: self.current_window(feature),
            used,
        };
        self.persist(feature, &record, &mut mirror);
        drop(mirror);

        self.bump();
        record
    }

    /// `set_usage` for signed input; negatives become 0
    pub fn set_usage_clamped(&self, feature: FeatureKey, used: i64) -> UsageRecord {
        let used = used.clamp(0, u32::MAX as i64) as u32;
        self.set_usage(feature, used)
    }

    /// Add `amount` uses in the current window
    pub fn increment_usage(&self, feature: FeatureKey, amount: u32) -> UsageRecord {
        let mut mirror = acquire_lock(&self.mirror);
        let current = self.load(feature, &mut mirror);
        let record = UsageRecord {
            used: current.used.saturating_add(amount),
            window_id: current.window_id,
        };
        self.persist(feature, &record, &mut mirror);
        drop(mirror);

        debug!(
            feature = %feature,
            used = record.used,
            window = %record.window_id,
            "Incremented usage"
        );
        self.bump();
        record
    }

    /// Drop the stored record; the next read starts a fresh one
    pub fn reset_usage(&self, feature: FeatureKey) {
        let mut mirror = acquire_lock(&self.mirror);
        if let Err(e) = self.store.remove(&feature.storage_key()) {
            warn!(feature = %feature, error = %e, "Failed to remove usage record");
        }
        mirror.remove(&feature);
        drop(mirror);

        debug!(feature = %feature, "Reset usage");
        self.bump();
    }

    pub fn remaining_for_free(&self, feature: FeatureKey) -> FreeStats {
        let limit = self.limit(feature).limit;
        let used = self.get_usage(feature).used;
        FreeStats::new(limit, used)
    }

    /// Whether a free user may use the feature right now
    pub fn can_use_free(&self, feature: FeatureKey) -> bool {
        let stats = self.remaining_for_free(feature);
        if stats.limit == 0 {
            return false;
        }
        stats.remaining > 0
    }

    pub fn next_reset(&self, feature: FeatureKey) -> Option<ResetInfo> {
        self.windows.next_reset(self.limit(feature).period)
    }

    /// Monotonic change token, bumped on every mutation
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn current_window(&self, feature: FeatureKey) -> String {
        self.windows.window_id(self.limit(feature).period)
    }

    fn load(&self, feature: FeatureKey, mirror: &mut Mirror) -> UsageRecord {
        let current = self.current_window(feature);

        let stored = match mirror.get(&feature) {
            Some(entry) if entry.dirty => Some(entry.record.clone()),
            _ => match read_json_entry::<UsageRecord>(self.store.as_ref(), &feature.storage_key()) {
                Ok(JsonEntry::Present(record)) => Some(record),
                Ok(JsonEntry::Missing) | Ok(JsonEntry::Corrupt) => None,
                Err(e) => {
                    warn!(feature = %feature, error = %e, "Usage read failed, using in-memory copy");
                    // The stored count is unknown, so nothing is written back
                    return match mirror.get(&feature) {
                        Some(entry) if entry.record.window_id == current => entry.record.clone(),
                        _ => UsageRecord {
                            window_id: current,
                            used: 0,
                        },
                    };
                }
            },
        };

        match stored {
            Some(record) if record.window_id == current => {
                mirror
                    .entry(feature)
                    .and_modify(|entry| entry.record = record.clone())
                    .or_insert_with(|| MirrorEntry {
                        record: record.clone(),
                        dirty: false,
                    });
                record
            }
            stale => {
                if let Some(old) = stale {
                    debug!(
                        feature = %feature,
                        from = %old.window_id,
                        to = %current,
                        "Usage window rolled over"
                    );
                }
                let fresh = UsageRecord {
                    window_id: current,
                    used: 0,
                };
                self.persist(feature, &fresh, mirror);
                fresh
            }
        }
    }

    fn persist(&self, feature: FeatureKey, record: &UsageRecord, mirror: &mut Mirror) {
        let dirty = match write_json(self.store.as_ref(), &feature.storage_key(), record) {
            Ok(()) => false,
            Err(e) => {
                warn!(feature = %feature, error = %e, "Failed to persist usage, keeping it in memory");
                true
            }
        };
        mirror.insert(
            feature,
            MirrorEntry {
                record: record.clone(),
                dirty,
            },
        );
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::billing::types::Period;
    use crate::billing::window::{ManualClock, DEFAULT_UTC_OFFSET_MINUTES};
    use crate::storage::{MemoryStore, StorageError};
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    pub(crate) fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    pub(crate) fn make_ledger(
        store: Arc<dyn KeyValueStore>,
        now: &str,
    ) -> (UsageLedger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(at(now)));
        let windows = WindowClock::new(DEFAULT_UTC_OFFSET_MINUTES, clock.clone());
        (
            UsageLedger::new(store, windows, FeatureLimits::default()),
            clock,
        )
    }

    /// Store whose reads and writes can be switched off
    #[derive(Default)]
    pub(crate) struct FlakyStore {
        inner: MemoryStore,
        pub(crate) fail_writes: AtomicBool,
        pub(crate) fail_reads: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("read failed".into()));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Backend("quota exceeded".into()));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    fn stored_record(store: &dyn KeyValueStore, feature: FeatureKey) -> UsageRecord {
        let raw = store.get(&feature.storage_key()).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[test]
    fn test_first_read_creates_record() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        let record = ledger.get_usage(FeatureKey::Chatbot);
        assert_eq!(record.used, 0);
        assert_eq!(record.window_id, "2026-02-03");
        assert_eq!(stored_record(store.as_ref(), FeatureKey::Chatbot), record);
    }

    #[test]
    fn test_day_window_rollover() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(
                &FeatureKey::Chatbot.storage_key(),
                r#"{"windowId":"2026-02-02","used":7}"#,
            )
            .unwrap();
        let (ledger, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        let record = ledger.get_usage(FeatureKey::Chatbot);
        assert_eq!(record.used, 0);
        assert_eq!(record.window_id, "2026-02-03");

        let persisted = stored_record(store.as_ref(), FeatureKey::Chatbot);
        assert_eq!(persisted.window_id, "2026-02-03");
        assert_eq!(persisted.used, 0);
    }

    #[test]
    fn test_rollover_after_clock_advances() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, clock) = make_ledger(store, "2026-02-03T15:00:00Z");

        ledger.increment_usage(FeatureKey::Chatbot, 4);
        ledger.increment_usage(FeatureKey::Diary, 4);

        clock.advance(chrono::Duration::days(1));
        assert_eq!(ledger.get_usage(FeatureKey::Chatbot).used, 0);
        // Monthly window is unchanged
        assert_eq!(ledger.get_usage(FeatureKey::Diary).used, 4);
    }

    #[test]
    fn test_corrupt_record_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(&FeatureKey::Diary.storage_key(), "not json at all")
            .unwrap();
        let (ledger, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        let record = ledger.get_usage(FeatureKey::Diary);
        assert_eq!(record.used, 0);
        assert_eq!(record.window_id, "2026-02");
        assert_eq!(stored_record(store.as_ref(), FeatureKey::Diary).used, 0);
    }

    #[test]
    fn test_limit_zero_never_usable() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, _) = make_ledger(store, "2026-02-03T15:00:00Z");

        assert!(!ledger.can_use_free(FeatureKey::Forum));
        ledger.set_usage(FeatureKey::Forum, 0);
        assert!(!ledger.can_use_free(FeatureKey::Forum));
        ledger.set_usage(FeatureKey::Forum, 3);
        assert!(!ledger.can_use_free(FeatureKey::Forum));
    }

    #[test]
    fn test_diary_last_monthly_use() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, _) = make_ledger(store, "2026-02-03T15:00:00Z");
        assert_eq!(ledger.limit(FeatureKey::Diary).period, Period::Month);

        ledger.set_usage(FeatureKey::Diary, 9);
        assert!(ledger.can_use_free(FeatureKey::Diary));

        ledger.increment_usage(FeatureKey::Diary, 1);
        let stats = ledger.remaining_for_free(FeatureKey::Diary);
        assert_eq!(stats, FreeStats::new(10, 10));
        assert_eq!(stats.remaining, 0);
        assert!(!ledger.can_use_free(FeatureKey::Diary));
    }

    #[test]
    fn test_remaining_is_monotonic() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, _) = make_ledger(store, "2026-02-03T15:00:00Z");

        let mut previous = ledger.remaining_for_free(FeatureKey::Chatbot).remaining;
        for amount in [1, 0, 3, 2, 5, 1, 7] {
            ledger.increment_usage(FeatureKey::Chatbot, amount);
            let remaining = ledger.remaining_for_free(FeatureKey::Chatbot).remaining;
            assert!(remaining <= previous);
            previous = remaining;
        }
        assert_eq!(previous, 0);
    }

    #[test]
    fn test_set_usage_clamps_negative() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, _) = make_ledger(store, "2026-02-03T15:00:00Z");

        assert_eq!(ledger.set_usage_clamped(FeatureKey::Chatbot, -4).used, 0);
        assert_eq!(ledger.set_usage_clamped(FeatureKey::Chatbot, 6).used, 6);
    }

    #[test]
    fn test_reset_usage() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        ledger.increment_usage(FeatureKey::Chatbot, 3);
        ledger.reset_usage(FeatureKey::Chatbot);
        assert!(store.get(&FeatureKey::Chatbot.storage_key()).unwrap().is_none());
        assert_eq!(ledger.get_usage(FeatureKey::Chatbot).used, 0);
    }

    #[test]
    fn test_version_bumps_on_mutation_only() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, _) = make_ledger(store, "2026-02-03T15:00:00Z");
        let rx = ledger.subscribe();

        ledger.get_usage(FeatureKey::Diary);
        assert_eq!(ledger.version(), 0);

        ledger.increment_usage(FeatureKey::Diary, 1);
        ledger.set_usage(FeatureKey::Diary, 5);
        ledger.reset_usage(FeatureKey::Diary);
        assert_eq!(ledger.version(), 3);
        assert!(rx.has_changed().unwrap());
    }

    #[test]
    fn test_independent_writers_can_lose_an_update() {
        // Two ledgers over one store (e.g. two windows of the app) do a
        // read-modify-write without coordination.
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (first, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");
        let (second, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        let seen_by_first = first.get_usage(FeatureKey::Chatbot);
        let seen_by_second = second.get_usage(FeatureKey::Chatbot);
        first.set_usage(FeatureKey::Chatbot, seen_by_first.used + 1);
        second.set_usage(FeatureKey::Chatbot, seen_by_second.used + 1);

        assert_eq!(stored_record(store.as_ref(), FeatureKey::Chatbot).used, 1);
    }

    #[test]
    fn test_concurrent_increments_on_one_ledger_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let (ledger, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        ledger.increment_usage(FeatureKey::Chatbot, 1);
                    }
                });
            }
        });

        assert_eq!(ledger.get_usage(FeatureKey::Chatbot).used, 200);
        assert_eq!(stored_record(store.as_ref(), FeatureKey::Chatbot).used, 200);
    }

    #[test]
    fn test_write_failure_keeps_session_count() {
        let store = Arc::new(FlakyStore::default());
        let (ledger, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        ledger.increment_usage(FeatureKey::Chatbot, 1);
        store.fail_writes.store(true, Ordering::SeqCst);

        ledger.increment_usage(FeatureKey::Chatbot, 1);
        ledger.increment_usage(FeatureKey::Chatbot, 1);
        assert_eq!(ledger.get_usage(FeatureKey::Chatbot).used, 3);
        // The store still has the last successful write
        assert_eq!(stored_record(store.as_ref(), FeatureKey::Chatbot).used, 1);

        store.fail_writes.store(false, Ordering::SeqCst);
        ledger.increment_usage(FeatureKey::Chatbot, 1);
        assert_eq!(stored_record(store.as_ref(), FeatureKey::Chatbot).used, 4);
    }

    #[test]
    fn test_read_failure_falls_back_to_mirror() {
        let store = Arc::new(FlakyStore::default());
        let (ledger, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        ledger.increment_usage(FeatureKey::Diary, 2);
        store.fail_reads.store(true, Ordering::SeqCst);
        assert_eq!(ledger.get_usage(FeatureKey::Diary).used, 2);
    }

    #[test]
    fn test_read_failure_never_overwrites_stored_count() {
        let store = Arc::new(FlakyStore::default());
        let stored = r#"{"windowId":"2026-02-03","used":7}"#;
        store
            .set(&FeatureKey::Chatbot.storage_key(), stored)
            .unwrap();
        let (ledger, _) = make_ledger(store.clone(), "2026-02-03T15:00:00Z");

        store.fail_reads.store(true, Ordering::SeqCst);
        let record = ledger.get_usage(FeatureKey::Chatbot);
        assert_eq!(record.window_id, "2026-02-03");
        assert_eq!(record.used, 0);

        store.fail_reads.store(false, Ordering::SeqCst);
        assert_eq!(
            store.get(&FeatureKey::Chatbot.storage_key()).unwrap().as_deref(),
            Some(stored)
        );
        assert_eq!(ledger.get_usage(FeatureKey::Chatbot).used, 7);
    }
}
