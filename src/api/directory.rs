//! Specialist directory client
//!
//! GET requests against the Nura API with a per-attempt deadline, linear
//! backoff on transient failures, and a fallback to the last successful
//! payload when every attempt failed:
//! - transient: timeout, network error, 502/503/504
//! - terminal: any other non-2xx status, or a 2xx body that is not JSON

use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::cache::DirectoryCache;
use super::http_client::HttpTransport;

/// Gateway/timeout class statuses worth retrying
pub const TRANSIENT_STATUSES: [u16; 3] = [502, 503, 504];

/// Directory endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Specialist listing, filterable
    Specialists,
    /// Specialty catalog
    Specialties,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Self::Specialists => "especialistas",
            Self::Specialties => "especialidades",
        }
    }

    pub fn cache_key(&self) -> &'static str {
        match self {
            Self::Specialists => "nura_cache_especialistas_v1",
            Self::Specialties => "nura_cache_especialidades_v1",
        }
    }
}

/// Retry and cache settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryConfig {
    /// Deadline for a single attempt
    pub timeout: Duration,
    /// Extra attempts after the first one
    pub max_retries: u32,
    /// Sleep before retry n is `n * backoff_step`
    pub backoff_step: Duration,
    /// Reject cached payloads older than this
    pub cache_ttl: Option<Duration>,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_retries: 2,
            backoff_step: Duration::from_millis(500),
            cache_ttl: None,
        }
    }
}

/// Directory fetch failure, after the cache fallback was tried
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Error {0}")]
    Status(u16),
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Invalid response body: {0}")]
    Decode(String),
    #[error("Invalid directory URL: {0}")]
    InvalidUrl(String),
}

impl DirectoryError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Status(status) => TRANSIENT_STATUSES.contains(status),
            Self::Timeout(_) | Self::Network(_) => true,
            Self::Decode(_) | Self::InvalidUrl(_) => false,
        }
    }
}

/// Payload plus whether it came from the local fallback
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryResponse {
    pub data: Value,
    pub from_cache: bool,
}

/// Client for `/especialistas` and `/especialidades`
pub struct DirectoryClient {
    api_base: String,
    config: DirectoryConfig,
    cache: DirectoryCache,
    transport: Arc<dyn HttpTransport>,
}

impl DirectoryClient {
    pub fn new(
        api_base: &str,
        config: DirectoryConfig,
        cache: DirectoryCache,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            api_base: normalize_base(api_base),
            config,
            cache,
            transport,
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Specialist listing; blank filter values are dropped
    pub async fn fetch_specialists<I, K, V>(
        &self,
        params: I,
    ) -> Result<DirectoryResponse, DirectoryError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let query = build_query(params);
        self.fetch(Endpoint::Specialists, &query).await
    }

    /// Specialty catalog
    pub async fn fetch_specialties(&self) -> Result<DirectoryResponse, DirectoryError> {
        self.fetch(Endpoint::Specialties, &[]).await
    }

    async fn fetch(
        &self,
        endpoint: Endpoint,
        query: &[(String, String)],
    ) -> Result<DirectoryResponse, DirectoryError> {
        let outcome = match self.endpoint_url(endpoint, query) {
            Ok(url) => self.fetch_with_retry(&url).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(data) => {
                self.cache.save(endpoint, &data);
                Ok(DirectoryResponse {
                    data,
                    from_cache: false,
                })
            }
            Err(e) => match self.cache.read(endpoint) {
                Some(data) => {
                    warn!(endpoint = ?endpoint, error = %e, "Serving cached directory payload");
                    Ok(DirectoryResponse {
                        data,
                        from_cache: true,
                    })
                }
                None => Err(e),
            },
        }
    }

    async fn fetch_with_retry(&self, url: &Url) -> Result<Value, DirectoryError> {
        let mut retry = 0;
        loop {
            match self.attempt(url).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_transient() && retry < self.config.max_retries => {
                    retry += 1;
                    let delay = self.config.backoff_step * retry;
                    warn!(
                        url = %url,
                        error = %e,
                        "Directory request failed, retry {}/{} in {:?}",
                        retry,
                        self.config.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One request under the deadline; a timed-out request is dropped, which aborts it
    async fn attempt(&self, url: &Url) -> Result<Value, DirectoryError> {
        let response = match tokio::time::timeout(self.config.timeout, self.transport.get(url, &[]))
            .await
        {
            Err(_) => return Err(DirectoryError::Timeout(self.config.timeout)),
            Ok(Err(e)) => return Err(DirectoryError::Network(e.0)),
            Ok(Ok(response)) => response,
        };

        if !response.is_success() {
            return Err(DirectoryError::Status(response.status));
        }

        let json: Value = serde_json::from_str(&response.body)
            .map_err(|e| DirectoryError::Decode(e.to_string()))?;
        debug!(url = %url, "Directory request succeeded");
        Ok(unwrap_payload(json))
    }

    fn endpoint_url(
        &self,
        endpoint: Endpoint,
        query: &[(String, String)],
    ) -> Result<Url, DirectoryError> {
        let mut url = Url::parse(&format!("{}/{}", self.api_base, endpoint.path()))
            .map_err(|e| DirectoryError::InvalidUrl(e.to_string()))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }
}

/// Strip trailing slashes from the API base
pub fn normalize_base(base: &str) -> String {
    base.trim_end_matches('/').to_string()
}

/// Keep non-blank values, trimmed, in the given order
pub fn build_query<I, K, V>(params: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    params
        .into_iter()
        .filter_map(|(key, value)| {
            let value = value.as_ref().trim();
            if value.is_empty() {
                None
            } else {
                Some((key.as_ref().to_string(), value.to_string()))
            }
        })
        .collect()
}

/// `{"data": x}` with a non-null `x` becomes `x`; anything else is returned as-is
pub fn unwrap_payload(json: Value) -> Value {
    match json {
        Value::Object(mut map) if map.get("data").is_some_and(|d| !d.is_null()) => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}
