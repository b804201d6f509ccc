//! Application state
//!
//! Wires the local store, plan resolver, usage ledger, directory client and
//! preferences together from an `AppConfig`. A host shell builds one
//! `AppState` at startup and hands out references to it.

use std::sync::Arc;
use tracing::info;

use crate::api::{
    DirectoryCache, DirectoryClient, HttpTransport, NotificationSettingsSource, ProfileSource,
    ReqwestTransport, SupabaseClient, UnconfiguredBackend,
};
use crate::billing::{
    BillingState, FeatureGate, FeatureKey, FeatureLimits, GateSnapshot, PlanResolver,
    SystemClock, UsageLedger, WindowClock,
};
use crate::config::AppConfig;
use crate::navigation::{NavigationGuard, SessionProvider};
use crate::preferences::Preferences;
use crate::storage::{KeyValueStore, SqliteStore, StorageError};

const DB_FILE: &str = "local_state.db";

pub struct AppState {
    pub config: AppConfig,
    pub billing: BillingState,
    pub directory: Arc<DirectoryClient>,
    pub preferences: Preferences,
    supabase: Option<Arc<SupabaseClient>>,
}

impl AppState {
    /// Open the on-disk store and connect to the configured backends
    pub fn new(config: AppConfig) -> Result<Self, StorageError> {
        let store = match &config.data_dir {
            Some(dir) => SqliteStore::open(&dir.join(DB_FILE))?,
            None => SqliteStore::open_default()?,
        };

        let supabase = config
            .supabase()
            .map(|(url, key)| Arc::new(SupabaseClient::new(url, key)));
        let profiles: Arc<dyn ProfileSource> = match &supabase {
            Some(client) => client.clone(),
            None => {
                info!("No Supabase backend configured, plan lookups will fail");
                Arc::new(UnconfiguredBackend)
            }
        };
        let notifications = supabase
            .clone()
            .map(|client| client as Arc<dyn NotificationSettingsSource>);

        let mut state = Self::with_parts(
            config,
            Arc::new(store),
            profiles,
            notifications,
            Arc::new(ReqwestTransport::shared()),
        );
        state.supabase = supabase;
        Ok(state)
    }

    /// Assemble from explicit collaborators
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        profiles: Arc<dyn ProfileSource>,
        notifications: Option<Arc<dyn NotificationSettingsSource>>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let windows = WindowClock::new(config.window_utc_offset_minutes, Arc::new(SystemClock));
        let ledger = Arc::new(UsageLedger::new(
            store.clone(),
            windows,
            FeatureLimits::default(),
        ));
        let plan = Arc::new(PlanResolver::new(
            store.clone(),
            profiles,
            config.plan_failure_policy,
        ));

        let cache = DirectoryCache::new(store.clone(), config.directory.cache_ttl);
        let directory = Arc::new(DirectoryClient::new(
            &config.api_base,
            config.directory.clone(),
            cache,
            transport,
        ));

        let preferences = match notifications {
            Some(remote) => Preferences::with_remote(store, remote),
            None => Preferences::new(store),
        };

        info!(api_base = %config.api_base, "Nura client state ready");

        Self {
            billing: BillingState::new(ledger, plan),
            directory,
            preferences,
            supabase: None,
            config,
        }
    }

    pub fn plan(&self) -> &Arc<PlanResolver> {
        &self.billing.plan
    }

    /// Gate rendered in the user's current locale
    pub fn gate(&self, feature: FeatureKey) -> FeatureGate {
        self.billing.gate(feature, self.preferences.locale())
    }

    pub fn snapshots(&self) -> Vec<GateSnapshot> {
        self.billing.snapshots(self.preferences.locale())
    }

    pub fn navigation_guard(&self, sessions: Arc<dyn SessionProvider>) -> NavigationGuard {
        NavigationGuard::new(sessions, self.billing.plan.clone())
    }

    /// Session token for Supabase requests
    pub fn set_access_token(&self, token: Option<String>) {
        if let Some(client) = &self.supabase {
            client.set_access_token(token);
        }
    }

    /// Forget everything tied to the signed-in user
    pub fn logout(&self) {
        self.set_access_token(None);
        self.billing.plan.clear();
    }
}
