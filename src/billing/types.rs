//! Billing data types

use serde::{Deserialize, Serialize};

/// Premium route the UI opens when a free user hits a gate
pub const UPGRADE_URL: &str = "/app/premium";

/// Gated capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKey {
    /// Creating forum posts
    Forum,
    /// Diary entries
    Diary,
    /// Chatbot conversations
    Chatbot,
}

impl FeatureKey {
    pub const ALL: [FeatureKey; 3] = [Self::Forum, Self::Diary, Self::Chatbot];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forum => "forum",
            Self::Diary => "diary",
            Self::Chatbot => "chatbot",
        }
    }

    /// Local store key of this feature's usage record
    pub fn storage_key(&self) -> String {
        format!("nura_usage_{}", self.as_str())
    }
}

impl std::fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window a quota is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Month,
}

/// Free-plan allowance for one feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureLimit {
    /// 0 means the feature is not included in the free plan at all
    pub limit: u32,
    pub period: Period,
}

/// Free-plan limits for every feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureLimits {
    pub forum: FeatureLimit,
    pub diary: FeatureLimit,
    pub chatbot: FeatureLimit,
}

impl Default for FeatureLimits {
    fn default() -> Self {
        Self {
            // Free users cannot create posts
            forum: FeatureLimit {
                limit: 0,
                period: Period::Day,
            },
            diary: FeatureLimit {
                limit: 10,
                period: Period::Month,
            },
            chatbot: FeatureLimit {
                limit: 10,
                period: Period::Day,
            },
        }
    }
}

impl FeatureLimits {
    pub fn get(&self, feature: FeatureKey) -> FeatureLimit {
        match feature {
            FeatureKey::Forum => self.forum,
            FeatureKey::Diary => self.diary,
            FeatureKey::Chatbot => self.chatbot,
        }
    }
}

/// Persisted usage counter for one feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    /// "YYYY-MM-DD" or "YYYY-MM" in the reference timezone
    pub window_id: String,
    pub used: u32,
}

/// Quota figures shown to free users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreeStats {
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
}

impl FreeStats {
    pub fn new(limit: u32, used: u32) -> Self {
        Self {
            limit,
            used,
            remaining: limit.saturating_sub(used),
        }
    }
}

/// Resolved plan of the current user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Free,
    Premium,
    /// Authoritative check not resolved yet
    #[default]
    Unknown,
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Premium => write!(f, "premium"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// What to do with the plan status when the remote lookup fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlanFailurePolicy {
    /// Keep the optimistic or previously resolved value
    #[default]
    KeepLastKnown,
    /// Fall back to free until a lookup succeeds
    Downgrade,
}

impl std::str::FromStr for PlanFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "keep-last-known" => Ok(Self::KeepLastKnown),
            "downgrade" => Ok(Self::Downgrade),
            other => Err(format!("unknown plan failure policy '{}'", other)),
        }
    }
}

/// Profile row returned by the remote lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    #[serde(default)]
    pub premium: Option<bool>,
    #[serde(default)]
    pub plan: Option<String>,
    #[serde(default)]
    pub terms_accepted: Option<bool>,
    #[serde(default)]
    pub is_admin: Option<bool>,
}

impl ProfileRecord {
    pub fn is_premium(&self) -> bool {
        self.premium == Some(true) || self.plan.as_deref() == Some("premium")
    }

    pub fn terms_accepted(&self) -> bool {
        self.terms_accepted == Some(true)
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin == Some(true)
    }
}

/// Per-feature gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GateState {
    Loading,
    FreeAvailable,
    FreeExhausted,
    Premium,
}

/// Everything the UI needs to render one gated feature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSnapshot {
    pub feature: FeatureKey,
    pub state: GateState,
    pub premium: bool,
    pub loading: bool,
    pub can_use: bool,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    pub period: Period,
    pub banner_text: String,
    pub version: u64,
}

/// Result of a limit check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum LimitCheckResult {
    #[serde(rename = "allowed")]
    Allowed {
        /// `None` when the user is premium
        remaining: Option<u32>,
    },
    #[serde(rename = "denied")]
    Denied {
        reason: LimitDenialReason,
        upgrade_url: Option<String>,
    },
}

impl LimitCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn denial_reason(&self) -> Option<&LimitDenialReason> {
        match self {
            Self::Denied { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Reason for denying a gated action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(tag = "type")]
pub enum LimitDenialReason {
    #[serde(rename = "featureNotIncluded")]
    FeatureNotIncluded { feature: FeatureKey },
    #[serde(rename = "limitExceeded")]
    LimitExceeded {
        feature: FeatureKey,
        limit: u32,
        used: u32,
        period: Period,
    },
}

impl std::fmt::Display for LimitDenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FeatureNotIncluded { feature } => {
                write!(f, "{} requires a premium plan", feature)
            }
            Self::LimitExceeded {
                feature,
                limit,
                used,
                period,
            } => {
                let window = match period {
                    Period::Day => "Daily",
                    Period::Month => "Monthly",
                };
                write!(
                    f,
                    "{} limit exceeded for {}: {}/{} uses",
                    window, feature, used, limit
                )
            }
        }
    }
}

impl std::error::Error for LimitDenialReason {}
