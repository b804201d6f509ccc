//! Plan status resolution with a local fast path
//!
//! The remote profile is authoritative. A flag in the local store remembers
//! the last successful answer so a premium user is treated as premium before
//! the lookup completes. The status is broadcast on a watch channel shared by
//! every gate.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::types::{PlanFailurePolicy, PlanStatus, ProfileRecord};
use crate::api::ProfileSource;
use crate::storage::KeyValueStore;
use crate::utils::{acquire_read_lock, acquire_write_lock};

/// Store key of the fast-path flag
pub const PREMIUM_FLAG_KEY: &str = "nura_is_premium";
/// Flag value meaning premium
pub const PREMIUM_SENTINEL: &str = "true";

/// Counts a refresh as in flight until dropped
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Process-wide plan status
pub struct PlanResolver {
    store: Arc<dyn KeyValueStore>,
    profiles: Arc<dyn ProfileSource>,
    policy: PlanFailurePolicy,
    status: watch::Sender<PlanStatus>,
    in_flight: AtomicUsize,
    /// Bumped on logout; refreshes started under an older epoch are dropped
    epoch: AtomicU64,
    last_profile: RwLock<Option<(String, ProfileRecord)>>,
}

impl PlanResolver {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        profiles: Arc<dyn ProfileSource>,
        policy: PlanFailurePolicy,
    ) -> Self {
        let (status, _) = watch::channel(PlanStatus::Unknown);
        Self {
            store,
            profiles,
            policy,
            status,
            in_flight: AtomicUsize::new(0),
            epoch: AtomicU64::new(0),
            last_profile: RwLock::new(None),
        }
    }

    pub fn policy(&self) -> PlanFailurePolicy {
        self.policy
    }

    /// Re-resolve the plan for a user; `None` means signed out
    pub async fn refresh(&self, user_id: Option<&str>) -> PlanStatus {
        let Some(user_id) = user_id else {
            self.set_status(PlanStatus::Free);
            return PlanStatus::Free;
        };

        let epoch = self.epoch.load(Ordering::SeqCst);
        let _in_flight = InFlight::enter(&self.in_flight);

        if self.read_flag() {
            self.set_status(PlanStatus::Premium);
        }

        let result = self.profiles.fetch_profile(user_id).await;

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(user_id, "Discarding plan lookup started before logout");
            return self.status();
        }

        let next = match result {
            Ok(profile) => {
                let profile = profile.unwrap_or_default();
                let premium = profile.is_premium();
                self.write_flag(premium);
                *acquire_write_lock(&self.last_profile) = Some((user_id.to_string(), profile));
                if premium {
                    PlanStatus::Premium
                } else {
                    PlanStatus::Free
                }
            }
            Err(e) => {
                warn!(user_id, error = %e, policy = ?self.policy, "Plan lookup failed");
                match (self.policy, self.status()) {
                    (PlanFailurePolicy::Downgrade, _) => PlanStatus::Free,
                    (PlanFailurePolicy::KeepLastKnown, PlanStatus::Unknown) => PlanStatus::Free,
                    (PlanFailurePolicy::KeepLastKnown, current) => current,
                }
            }
        };

        self.set_status(next);
        next
    }

    pub fn is_premium(&self) -> bool {
        self.status() == PlanStatus::Premium
    }

    pub fn status(&self) -> PlanStatus {
        *self.status.borrow()
    }

    /// A refresh is awaiting the remote lookup
    pub fn loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn subscribe(&self) -> watch::Receiver<PlanStatus> {
        self.status.subscribe()
    }

    /// Profile from the last successful lookup, if it was for this user
    pub fn last_profile(&self, user_id: &str) -> Option<ProfileRecord> {
        acquire_read_lock(&self.last_profile)
            .as_ref()
            .filter(|(id, _)| id == user_id)
            .map(|(_, profile)| profile.clone())
    }

    /// Logout: back to unknown, forget the fast-path flag and cached profile
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *acquire_write_lock(&self.last_profile) = None;
        if let Err(e) = self.store.remove(PREMIUM_FLAG_KEY) {
            warn!(error = %e, "Failed to remove premium flag");
        }
        self.set_status(PlanStatus::Unknown);
    }

    fn set_status(&self, next: PlanStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            debug!(status = %next, "Plan status changed");
        }
    }

    fn read_flag(&self) -> bool {
        match self.store.get(PREMIUM_FLAG_KEY) {
            Ok(value) => value.as_deref() == Some(PREMIUM_SENTINEL),
            Err(e) => {
                warn!(error = %e, "Failed to read premium flag");
                false
            }
        }
    }

    fn write_flag(&self, premium: bool) {
        let value = if premium { PREMIUM_SENTINEL } else { "false" };
        if let Err(e) = self.store.set(PREMIUM_FLAG_KEY, value) {
            warn!(error = %e, "Failed to persist premium flag");
        }
    }
}
