//! Remote notification settings
//!
//! One row per user in `notification_settings`, keyed by `user_id`. Missing
//! or null columns read as disabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::profiles::{SupabaseClient, SupabaseError, UnconfiguredBackend};
use crate::preferences::NotificationSettings;

const NOTIFICATION_TABLE: &str = "notification_settings";
const NOTIFICATION_COLUMNS: &str = "bienestar,profesional,app_updates";

/// Server copy of the user's notification settings
#[async_trait]
pub trait NotificationSettingsSource: Send + Sync {
    async fn load_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationSettings>, SupabaseError>;

    /// Insert or replace the user's row
    async fn upsert_settings(
        &self,
        user_id: &str,
        settings: &NotificationSettings,
    ) -> Result<(), SupabaseError>;
}

#[derive(Debug, Deserialize)]
struct SettingsRow {
    #[serde(default)]
    bienestar: Option<bool>,
    #[serde(default)]
    profesional: Option<bool>,
    #[serde(default)]
    app_updates: Option<bool>,
}

impl From<SettingsRow> for NotificationSettings {
    fn from(row: SettingsRow) -> Self {
        Self {
            bienestar: row.bienestar.unwrap_or(false),
            profesional: row.profesional.unwrap_or(false),
            app_updates: row.app_updates.unwrap_or(false),
        }
    }
}

#[derive(Serialize)]
struct UpsertRow<'a> {
    user_id: &'a str,
    #[serde(flatten)]
    settings: &'a NotificationSettings,
}

#[async_trait]
impl NotificationSettingsSource for SupabaseClient {
    async fn load_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationSettings>, SupabaseError> {
        let mut url = self.table_url(NOTIFICATION_TABLE)?;
        url.query_pairs_mut()
            .append_pair("select", NOTIFICATION_COLUMNS)
            .append_pair("user_id", &format!("eq.{}", user_id));

        let response = self
            .transport()
            .get(&url, &self.headers())
            .await
            .map_err(|e| SupabaseError::Request(e.to_string()))?;

        if !response.is_success() {
            return Err(SupabaseError::Status(response.status));
        }

        let rows: Vec<SettingsRow> = serde_json::from_str(&response.body)
            .map_err(|e| SupabaseError::Decode(e.to_string()))?;

        debug!(user_id, found = !rows.is_empty(), "Fetched notification settings");
        Ok(rows.into_iter().next().map(NotificationSettings::from))
    }

    async fn upsert_settings(
        &self,
        user_id: &str,
        settings: &NotificationSettings,
    ) -> Result<(), SupabaseError> {
        let mut url = self.table_url(NOTIFICATION_TABLE)?;
        url.query_pairs_mut().append_pair("on_conflict", "user_id");

        let body = serde_json::to_string(&UpsertRow { user_id, settings })
            .map_err(|e| SupabaseError::Decode(e.to_string()))?;

        let mut headers = self.headers();
        headers.push(("Content-Type".to_string(), "application/json".to_string()));
        headers.push((
            "Prefer".to_string(),
            "resolution=merge-duplicates,return=minimal".to_string(),
        ));

        let response = self
            .transport()
            .post(&url, &headers, body)
            .await
            .map_err(|e| SupabaseError::Request(e.to_string()))?;

        if !response.is_success() {
            return Err(SupabaseError::Status(response.status));
        }

        debug!(user_id, "Saved notification settings");
        Ok(())
    }
}

#[async_trait]
impl NotificationSettingsSource for UnconfiguredBackend {
    async fn load_settings(
        &self,
        _user_id: &str,
    ) -> Result<Option<NotificationSettings>, SupabaseError> {
        Err(SupabaseError::NotConfigured)
    }

    async fn upsert_settings(
        &self,
        _user_id: &str,
        _settings: &NotificationSettings,
    ) -> Result<(), SupabaseError> {
        Err(SupabaseError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_load_settings_row() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/rest/v1/notification_settings")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("select".into(), NOTIFICATION_COLUMNS.into()),
                Matcher::UrlEncoded("user_id".into(), "eq.user-1".into()),
            ]))
            .match_header("apikey", "anon-key")
            .match_header("authorization", "Bearer session-token")
            .with_status(200)
            .with_body(r#"[{"bienestar":false,"profesional":true,"app_updates":null}]"#)
            .create_async()
            .await;

        let client = SupabaseClient::new(&server.url(), "anon-key");
        client.set_access_token(Some("session-token".to_string()));

        let settings = client.load_settings("user-1").await.unwrap().unwrap();
        assert!(!settings.bienestar);
        assert!(settings.profesional);
        assert!(!settings.app_updates);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_load_without_row_is_none() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/rest/v1/notification_settings")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let client = SupabaseClient::new(&server.url(), "anon-key");
        assert_eq!(client.load_settings("user-1").await, Ok(None));
    }

    #[tokio::test]
    async fn test_upsert_conflicts_on_user_id() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/notification_settings")
            .match_query(Matcher::UrlEncoded("on_conflict".into(), "user_id".into()))
            .match_header("content-type", "application/json")
            .match_header("prefer", Matcher::Regex("resolution=merge-duplicates".into()))
            .match_body(Matcher::Json(serde_json::json!({
                "user_id": "user-1",
                "bienestar": true,
                "profesional": false,
                "app_updates": true,
            })))
            .with_status(201)
            .create_async()
            .await;

        let client = SupabaseClient::new(&server.url(), "anon-key");
        let settings = NotificationSettings {
            profesional: false,
            ..Default::default()
        };
        assert_eq!(client.upsert_settings("user-1", &settings).await, Ok(()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upsert_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/rest/v1/notification_settings")
            .match_query(Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let client = SupabaseClient::new(&server.url(), "anon-key");
        assert_eq!(
            client
                .upsert_settings("user-1", &NotificationSettings::default())
                .await,
            Err(SupabaseError::Status(403))
        );
    }

    #[tokio::test]
    async fn test_unconfigured_backend_fails() {
        assert_eq!(
            UnconfiguredBackend.load_settings("user-1").await,
            Err(SupabaseError::NotConfigured)
        );
    }
}
