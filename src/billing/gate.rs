//! Feature gates
//!
//! A gate combines the usage ledger with the shared plan resolver into the
//! per-feature decision the UI renders. Premium users bypass the ledger
//! entirely, and their usage is never recorded.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use super::subscription::PlanResolver;
use super::types::{
    FeatureKey, FeatureLimit, FreeStats, GateSnapshot, GateState, LimitCheckResult,
    LimitDenialReason, Period, PlanStatus, UPGRADE_URL,
};
use super::usage::UsageLedger;
use crate::preferences::Locale;

/// Gate for one feature
#[derive(Clone)]
pub struct FeatureGate {
    feature: FeatureKey,
    ledger: Arc<UsageLedger>,
    plan: Arc<PlanResolver>,
    locale: Locale,
}

impl FeatureGate {
    pub fn new(feature: FeatureKey, ledger: Arc<UsageLedger>, plan: Arc<PlanResolver>) -> Self {
        Self {
            feature,
            ledger,
            plan,
            locale: Locale::default(),
        }
    }

    /// Banner language
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    pub fn feature(&self) -> FeatureKey {
        self.feature
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    pub fn premium(&self) -> bool {
        self.plan.is_premium()
    }

    /// Plan not resolved yet, or a lookup is pending
    pub fn loading(&self) -> bool {
        self.plan.status() == PlanStatus::Unknown || self.plan.loading()
    }

    pub fn limits(&self) -> FeatureLimit {
        self.ledger.limit(self.feature)
    }

    pub fn free_stats(&self) -> FreeStats {
        self.ledger.remaining_for_free(self.feature)
    }

    pub fn can_use(&self) -> bool {
        self.premium() || self.ledger.can_use_free(self.feature)
    }

    /// Remaining-uses message; empty for premium users and excluded features
    pub fn banner_text(&self) -> String {
        if self.premium() {
            return String::new();
        }
        let limit = self.limits();
        if limit.limit == 0 {
            return String::new();
        }
        format_banner(self.locale, self.free_stats().remaining, limit.period)
    }

    pub fn state(&self) -> GateState {
        match self.plan.status() {
            PlanStatus::Premium => GateState::Premium,
            PlanStatus::Unknown => GateState::Loading,
            PlanStatus::Free if self.ledger.can_use_free(self.feature) => GateState::FreeAvailable,
            PlanStatus::Free => GateState::FreeExhausted,
        }
    }

    pub fn snapshot(&self) -> GateSnapshot {
        let limit = self.limits();
        let stats = self.free_stats();
        let premium = self.premium();
        GateSnapshot {
            feature: self.feature,
            state: self.state(),
            premium,
            loading: self.loading(),
            can_use: premium || (limit.limit > 0 && stats.remaining > 0),
            limit: stats.limit,
            used: stats.used,
            remaining: stats.remaining,
            period: limit.period,
            banner_text: self.banner_text(),
            version: self.ledger.version(),
        }
    }

    /// Pre-flight check without recording anything
    pub fn check(&self) -> LimitCheckResult {
        if self.premium() {
            return LimitCheckResult::Allowed { remaining: None };
        }

        let limit = self.limits();
        if limit.limit == 0 {
            return denied(LimitDenialReason::FeatureNotIncluded {
                feature: self.feature,
            });
        }

        let stats = self.free_stats();
        if stats.remaining == 0 {
            return denied(self.exceeded(stats, limit.period));
        }

        LimitCheckResult::Allowed {
            remaining: Some(stats.remaining),
        }
    }

    /// Record `amount` uses; premium users are not metered
    pub fn consume(&self, amount: u32) -> GateSnapshot {
        if self.premium() {
            debug!(feature = %self.feature, "Premium user, usage not recorded");
            return self.snapshot();
        }

        let record = self.ledger.increment_usage(self.feature, amount);
        debug!(feature = %self.feature, used = record.used, "Consumed free usage");
        self.snapshot()
    }

    /// `check` then `consume`, refusing amounts beyond the remaining quota
    pub fn try_consume(&self, amount: u32) -> Result<GateSnapshot, LimitDenialReason> {
        match self.check() {
            LimitCheckResult::Denied { reason, .. } => Err(reason),
            LimitCheckResult::Allowed {
                remaining: Some(remaining),
            } if amount > remaining => {
                Err(self.exceeded(self.free_stats(), self.limits().period))
            }
            LimitCheckResult::Allowed { .. } => Ok(self.consume(amount)),
        }
    }

    /// Force a plan refresh; every gate sharing the resolver observes it
    pub async fn reload_premium(&self, user_id: Option<&str>) -> PlanStatus {
        self.plan.refresh(user_id).await
    }

    pub fn watch(&self) -> GateWatcher {
        GateWatcher::new(self.ledger.subscribe(), self.plan.subscribe())
    }

    fn exceeded(&self, stats: FreeStats, period: Period) -> LimitDenialReason {
        LimitDenialReason::LimitExceeded {
            feature: self.feature,
            limit: stats.limit,
            used: stats.used,
            period,
        }
    }
}

/// Wakes when usage or plan status changes
pub struct GateWatcher {
    usage: watch::Receiver<u64>,
    plan: watch::Receiver<PlanStatus>,
    usage_open: bool,
    plan_open: bool,
}

impl GateWatcher {
    fn new(usage: watch::Receiver<u64>, plan: watch::Receiver<PlanStatus>) -> Self {
        Self {
            usage,
            plan,
            usage_open: true,
            plan_open: true,
        }
    }

    /// Wait for the next change; `false` once both sources are gone
    pub async fn changed(&mut self) -> bool {
        loop {
            tokio::select! {
                res = self.usage.changed(), if self.usage_open => match res {
                    Ok(()) => return true,
                    Err(_) => self.usage_open = false,
                },
                res = self.plan.changed(), if self.plan_open => match res {
                    Ok(()) => return true,
                    Err(_) => self.plan_open = false,
                },
                else => return false,
            }
        }
    }
}

fn denied(reason: LimitDenialReason) -> LimitCheckResult {
    LimitCheckResult::Denied {
        reason,
        upgrade_url: Some(UPGRADE_URL.to_string()),
    }
}

fn format_banner(locale: Locale, remaining: u32, period: Period) -> String {
    match (locale, period) {
        (Locale::EsAr, Period::Day) => format!("Te quedan {} usos hoy", remaining),
        (Locale::EsAr, Period::Month) => format!("Te quedan {} usos este mes", remaining),
        (Locale::En, Period::Day) => format!("{} uses left today", remaining),
        (Locale::En, Period::Month) => format!("{} uses left this month", remaining),
    }
}
