//! Supabase backend and remote profile lookup
//!
//! The profile row carries the premium indicator, terms acceptance and the
//! admin flag. A user without a row is a valid outcome (`Ok(None)`).
//! `SupabaseClient` also serves the notification settings table.

use async_trait::async_trait;
use reqwest::Url;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

use super::http_client::{HttpTransport, ReqwestTransport};
use crate::billing::ProfileRecord;
use crate::utils::{acquire_read_lock, acquire_write_lock};

const PROFILE_COLUMNS: &str = "premium,plan,terms_accepted,is_admin";

/// Errors from the Supabase backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SupabaseError {
    #[error("supabase request failed: {0}")]
    Request(String),
    #[error("supabase returned status {0}")]
    Status(u16),
    #[error("invalid supabase payload: {0}")]
    Decode(String),
    #[error("supabase backend is not configured")]
    NotConfigured,
}

/// Source of the authoritative profile record
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, SupabaseError>;
}

/// Supabase (PostgREST) endpoint shared by every table this crate reads
pub struct SupabaseClient {
    base_url: String,
    anon_key: String,
    access_token: RwLock<Option<String>>,
    transport: Arc<dyn HttpTransport>,
}

impl SupabaseClient {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self::with_transport(base_url, anon_key, Arc::new(ReqwestTransport::shared()))
    }

    pub fn with_transport(
        base_url: &str,
        anon_key: &str,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            access_token: RwLock::new(None),
            transport,
        }
    }

    /// Session token used for row-level security; `None` falls back to the anon key
    pub fn set_access_token(&self, token: Option<String>) {
        *acquire_write_lock(&self.access_token) = token;
    }

    pub(super) fn table_url(&self, table: &str) -> Result<Url, SupabaseError> {
        Url::parse(&format!("{}/rest/v1/{}", self.base_url, table))
            .map_err(|e| SupabaseError::Request(format!("invalid {} URL: {}", table, e)))
    }

    pub(super) fn headers(&self) -> Vec<(String, String)> {
        let bearer = acquire_read_lock(&self.access_token)
            .clone()
            .unwrap_or_else(|| self.anon_key.clone());
        vec![
            ("apikey".to_string(), self.anon_key.clone()),
            ("Authorization".to_string(), format!("Bearer {}", bearer)),
            ("Accept".to_string(), "application/json".to_string()),
        ]
    }

    pub(super) fn transport(&self) -> &dyn HttpTransport {
        self.transport.as_ref()
    }
}

#[async_trait]
impl ProfileSource for SupabaseClient {
    async fn fetch_profile(&self, user_id: &str) -> Result<Option<ProfileRecord>, SupabaseError> {
        let mut url = self.table_url("profiles")?;
        url.query_pairs_mut()
            .append_pair("select", PROFILE_COLUMNS)
            .append_pair("id", &format!("eq.{}", user_id));

        let response = self
            .transport
            .get(&url, &self.headers())
            .await
            .map_err(|e| SupabaseError::Request(e.to_string()))?;

        if !response.is_success() {
            return Err(SupabaseError::Status(response.status));
        }

        let rows: Vec<ProfileRecord> = serde_json::from_str(&response.body)
            .map_err(|e| SupabaseError::Decode(e.to_string()))?;

        debug!(user_id, found = !rows.is_empty(), "Fetched profile");
        Ok(rows.into_iter().next())
    }
}

/// Backend used when Supabase is not configured; every call fails
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredBackend;

#[async_trait]
impl ProfileSource for UnconfiguredBackend {
    async fn fetch_profile(&self, _user_id: &str) -> Result<Option<ProfileRecord>, SupabaseError> {
        Err(SupabaseError::NotConfigured)
    }
}
