//! Locally persisted user preferences
//!
//! The locale is stored as a bare tag and notification settings as JSON. Both
//! degrade to defaults when missing or unreadable, field by field for the
//! notification settings. Notification settings can also follow a server
//! copy for the signed-in user.

use serde::{Deserialize, Deserializer, Serialize};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::api::NotificationSettingsSource;
use crate::storage::{read_json, write_json, KeyValueStore};
use crate::utils::{acquire_read_lock, acquire_write_lock};

pub const LOCALE_KEY: &str = "nura_locale";
pub const NOTIFICATIONS_KEY: &str = "nura_notifications";

/// UI language
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Locale {
    #[default]
    #[serde(rename = "es-AR")]
    EsAr,
    #[serde(rename = "en")]
    En,
}

impl Locale {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EsAr => "es-AR",
            Self::En => "en",
        }
    }

    /// Parse a stored tag; anything unrecognized is `None`
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "es-AR" => Some(Self::EsAr),
            "en" => Some(Self::En),
            _ => None,
        }
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification categories the user can mute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    /// Wellness reminders
    Bienestar,
    /// Messages from professionals
    Profesional,
    AppUpdates,
}

fn enabled_by_default() -> bool {
    true
}

/// Non-boolean values fall back to the default instead of failing the record
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_bool().unwrap_or_else(enabled_by_default))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default = "enabled_by_default", deserialize_with = "lenient_bool")]
    pub bienestar: bool,
    #[serde(default = "enabled_by_default", deserialize_with = "lenient_bool")]
    pub profesional: bool,
    #[serde(default = "enabled_by_default", deserialize_with = "lenient_bool")]
    pub app_updates: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            bienestar: true,
            profesional: true,
            app_updates: true,
        }
    }
}

impl NotificationSettings {
    pub fn is_enabled(&self, category: NotificationCategory) -> bool {
        match category {
            NotificationCategory::Bienestar => self.bienestar,
            NotificationCategory::Profesional => self.profesional,
            NotificationCategory::AppUpdates => self.app_updates,
        }
    }
}

/// Partial update; `None` fields keep their current value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct NotificationPatch {
    pub bienestar: Option<bool>,
    pub profesional: Option<bool>,
    pub app_updates: Option<bool>,
}

/// Values whose last write to the store failed; reads prefer them
#[derive(Debug, Default)]
struct Unsaved {
    locale: Option<Locale>,
    notifications: Option<NotificationSettings>,
}

pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
    remote: Option<Arc<dyn NotificationSettingsSource>>,
    unsaved: RwLock<Unsaved>,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            remote: None,
            unsaved: RwLock::new(Unsaved::default()),
        }
    }

    /// Preferences whose notification settings follow a server copy
    pub fn with_remote(
        store: Arc<dyn KeyValueStore>,
        remote: Arc<dyn NotificationSettingsSource>,
    ) -> Self {
        Self {
            remote: Some(remote),
            ..Self::new(store)
        }
    }

    pub fn locale(&self) -> Locale {
        if let Some(locale) = acquire_read_lock(&self.unsaved).locale {
            return locale;
        }
        match self.store.get(LOCALE_KEY) {
            Ok(Some(tag)) => Locale::from_tag(&tag).unwrap_or_else(|| {
                warn!(tag = %tag, "Unknown stored locale, using default");
                Locale::default()
            }),
            Ok(None) => Locale::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read locale");
                Locale::default()
            }
        }
    }

    pub fn set_locale(&self, locale: Locale) {
        let mut unsaved = acquire_write_lock(&self.unsaved);
        match self.store.set(LOCALE_KEY, locale.as_str()) {
            Ok(()) => unsaved.locale = None,
            Err(e) => {
                warn!(error = %e, "Failed to persist locale, keeping it for this session");
                unsaved.locale = Some(locale);
            }
        }
    }

    pub fn notifications(&self) -> NotificationSettings {
        if let Some(settings) = acquire_read_lock(&self.unsaved).notifications {
            return settings;
        }
        read_json(self.store.as_ref(), NOTIFICATIONS_KEY).unwrap_or_default()
    }

    /// Apply a patch on top of the stored (or default) settings and persist
    pub fn update_notifications(&self, patch: NotificationPatch) -> NotificationSettings {
        let mut settings = self.notifications();
        if let Some(value) = patch.bienestar {
            settings.bienestar = value;
        }
        if let Some(value) = patch.profesional {
            settings.profesional = value;
        }
        if let Some(value) = patch.app_updates {
            settings.app_updates = value;
        }

        self.store_notifications(settings);
        settings
    }

    pub fn category_enabled(&self, category: NotificationCategory) -> bool {
        self.notifications().is_enabled(category)
    }

    /// Pull the signed-in user's settings; the server copy replaces the local one
    ///
    /// Without a user, a remote, or a server row, the local settings stand.
    pub async fn sync_notifications(&self, user_id: Option<&str>) -> NotificationSettings {
        let (Some(user_id), Some(remote)) = (user_id, &self.remote) else {
            return self.notifications();
        };

        match remote.load_settings(user_id).await {
            Ok(Some(settings)) => {
                self.store_notifications(settings);
                settings
            }
            Ok(None) => {
                debug!(user_id, "No server notification settings, keeping local");
                self.notifications()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load notification settings");
                self.notifications()
            }
        }
    }

    /// Update locally first, then push the result for the signed-in user
    pub async fn save_notifications(
        &self,
        user_id: Option<&str>,
        patch: NotificationPatch,
    ) -> NotificationSettings {
        let settings = self.update_notifications(patch);
        if let (Some(user_id), Some(remote)) = (user_id, &self.remote) {
            if let Err(e) = remote.upsert_settings(user_id, &settings).await {
                warn!(error = %e, "Failed to save notification settings");
            }
        }
        settings
    }

    fn store_notifications(&self, settings: NotificationSettings) {
        let mut unsaved = acquire_write_lock(&self.unsaved);
        match write_json(self.store.as_ref(), NOTIFICATIONS_KEY, &settings) {
            Ok(()) => unsaved.notifications = None,
            Err(e) => {
                warn!(error = %e, "Failed to persist notification settings, keeping them for this session");
                unsaved.notifications = Some(settings);
            }
        }
    }
}
