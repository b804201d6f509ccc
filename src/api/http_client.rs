//! Shared HTTP Client Module
//!
//! Provides a global, lazy-initialized HTTP client with connection pooling,
//! and the `HttpTransport` seam the directory and profile clients talk to.
//!
//! The shared client has no request timeout of its own: the directory client
//! enforces a per-attempt deadline around each call instead.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::{Client, RequestBuilder, Url};
use std::time::Duration;
use thiserror::Error;

/// Global HTTP client for the Nura API and the profile backend
pub static API_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .pool_max_idle_per_host(8)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build tuned HTTP client, using defaults: {}", e);
            Client::new()
        })
});

/// Get the global API HTTP client
#[inline]
pub fn api_client() -> &'static Client {
    &API_CLIENT
}

/// Raw response of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure below the HTTP status level (DNS, connect, reset, body read)
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("network error: {0}")]
pub struct TransportError(pub String);

/// Minimal transport: GET for lookups, POST with a JSON body for upserts
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, TransportError>;

    async fn post(
        &self,
        url: &Url,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse, TransportError>;
}

/// Transport backed by reqwest
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Transport over the global pooled client
    pub fn shared() -> Self {
        Self::new(api_client().clone())
    }

    async fn send(
        mut request: RequestBuilder,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError(format!("Failed to read body: {}", e)))?;

        Ok(HttpResponse { status, body })
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::shared()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &Url,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, TransportError> {
        Self::send(self.client.get(url.clone()), headers).await
    }

    async fn post(
        &self,
        url: &Url,
        headers: &[(String, String)],
        body: String,
    ) -> Result<HttpResponse, TransportError> {
        Self::send(self.client.post(url.clone()).body(body), headers).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_is_same_instance() {
        let client1 = api_client();
        let client2 = api_client();
        assert!(std::ptr::eq(client1, client2));
    }

    #[tokio::test]
    async fn test_reqwest_transport_get() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/especialidades")
            .match_header("x-test", "1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":["psicologia"]}"#)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/api/especialidades", server.url())).unwrap();
        let response = ReqwestTransport::shared()
            .get(&url, &[("x-test".to_string(), "1".to_string())])
            .await
            .unwrap();

        assert!(response.is_success());
        assert_eq!(response.body, r#"{"data":["psicologia"]}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_reqwest_transport_reports_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/especialistas")
            .with_status(503)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/api/especialistas", server.url())).unwrap();
        let response = ReqwestTransport::shared().get(&url, &[]).await.unwrap();
        assert_eq!(response.status, 503);
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_reqwest_transport_post_sends_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/rest/v1/notification_settings")
            .match_header("content-type", "application/json")
            .match_body(r#"{"user_id":"user-1"}"#)
            .with_status(201)
            .create_async()
            .await;

        let url = Url::parse(&format!("{}/rest/v1/notification_settings", server.url())).unwrap();
        let response = ReqwestTransport::shared()
            .post(
                &url,
                &[("Content-Type".to_string(), "application/json".to_string())],
                r#"{"user_id":"user-1"}"#.to_string(),
            )
            .await
            .unwrap();
        assert_eq!(response.status, 201);
        mock.assert_async().await;
    }
}
