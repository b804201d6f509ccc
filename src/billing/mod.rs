//! Freemium gating
//!
//! This module handles:
//! - Per-feature usage counters scoped to a day or month window
//! - Free/premium plan resolution shared by every consumer
//! - Feature gates combining both into a render-ready decision

mod gate;
pub(crate) mod subscription;
mod types;
pub(crate) mod usage;
mod window;

pub use gate::{FeatureGate, GateWatcher};
pub use subscription::{PlanResolver, PREMIUM_FLAG_KEY, PREMIUM_SENTINEL};
pub use types::{
    FeatureKey, FeatureLimit, FeatureLimits, FreeStats, GateSnapshot, GateState,
    LimitCheckResult, LimitDenialReason, Period, PlanFailurePolicy, PlanStatus, ProfileRecord,
    UsageRecord, UPGRADE_URL,
};
pub use usage::UsageLedger;
pub use window::{
    window_label, Clock, ManualClock, ResetInfo, SystemClock, WindowClock,
    DEFAULT_UTC_OFFSET_MINUTES,
};

use std::sync::Arc;

use crate::preferences::Locale;

/// Ledger and plan resolver shared by all gates
#[derive(Clone)]
pub struct BillingState {
    pub ledger: Arc<UsageLedger>,
    pub plan: Arc<PlanResolver>,
}

impl BillingState {
    pub fn new(ledger: Arc<UsageLedger>, plan: Arc<PlanResolver>) -> Self {
        Self { ledger, plan }
    }

    /// Gate for one feature over the shared ledger and resolver
    pub fn gate(&self, feature: FeatureKey, locale: Locale) -> FeatureGate {
        FeatureGate::new(feature, self.ledger.clone(), self.plan.clone()).with_locale(locale)
    }

    /// Snapshots of every feature, in `FeatureKey::ALL` order
    pub fn snapshots(&self, locale: Locale) -> Vec<GateSnapshot> {
        FeatureKey::ALL
            .iter()
            .map(|feature| self.gate(*feature, locale).snapshot())
            .collect()
    }
}
