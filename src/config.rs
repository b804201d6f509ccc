//! Runtime configuration
//!
//! Read from `NURA_*` environment variables, optionally seeded from a `.env`
//! file. Unset variables keep their defaults.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::api::{normalize_base, DirectoryConfig};
use crate::billing::{PlanFailurePolicy, DEFAULT_UTC_OFFSET_MINUTES};

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

const MINUTES_PER_DAY: i32 = 24 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Nura API base, no trailing slash
    pub api_base: String,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
    /// Directory holding `local_state.db`; `None` uses the platform config dir
    pub data_dir: Option<PathBuf>,
    pub directory: DirectoryConfig,
    pub window_utc_offset_minutes: i32,
    pub plan_failure_policy: PlanFailurePolicy,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_URL.to_string(),
            supabase_url: None,
            supabase_anon_key: None,
            data_dir: None,
            directory: DirectoryConfig::default(),
            window_utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            plan_failure_policy: PlanFailurePolicy::default(),
        }
    }
}

impl AppConfig {
    /// Load `.env` (current dir, then parent) and read the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_path("../.env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(url) = get("NURA_API_URL") {
            config.api_base = normalize_base(&url);
        }
        config.supabase_url = get("NURA_SUPABASE_URL");
        config.supabase_anon_key = get("NURA_SUPABASE_ANON_KEY");
        config.data_dir = get("NURA_DATA_DIR").map(PathBuf::from);

        if let Some(ms) = parse::<u64>("NURA_DIRECTORY_TIMEOUT_MS", get("NURA_DIRECTORY_TIMEOUT_MS"))? {
            config.directory.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse::<u32>("NURA_DIRECTORY_RETRIES", get("NURA_DIRECTORY_RETRIES"))? {
            config.directory.max_retries = retries;
        }
        if let Some(ms) = parse::<u64>("NURA_DIRECTORY_BACKOFF_MS", get("NURA_DIRECTORY_BACKOFF_MS"))? {
            config.directory.backoff_step = Duration::from_millis(ms);
        }
        if let Some(secs) =
            parse::<u64>("NURA_DIRECTORY_CACHE_TTL_SECS", get("NURA_DIRECTORY_CACHE_TTL_SECS"))?
        {
            config.directory.cache_ttl = Some(Duration::from_secs(secs));
        }
        if let Some(offset) = parse::<i32>(
            "NURA_WINDOW_UTC_OFFSET_MINUTES",
            get("NURA_WINDOW_UTC_OFFSET_MINUTES"),
        )? {
            if offset.unsigned_abs() >= MINUTES_PER_DAY.unsigned_abs() {
                return Err(ConfigError::Invalid {
                    key: "NURA_WINDOW_UTC_OFFSET_MINUTES",
                    value: offset.to_string(),
                    reason: "offset must be less than one day".to_string(),
                });
            }
            config.window_utc_offset_minutes = offset;
        }
        if let Some(policy) =
            parse::<PlanFailurePolicy>("NURA_PLAN_FAILURE_POLICY", get("NURA_PLAN_FAILURE_POLICY"))?
        {
            config.plan_failure_policy = policy;
        }

        Ok(config)
    }

    /// Profile lookups need both the project URL and the anon key
    pub fn supabase(&self) -> Option<(&str, &str)> {
        match (&self.supabase_url, &self.supabase_anon_key) {
            (Some(url), Some(key)) => Some((url.as_str(), key.as_str())),
            _ => None,
        }
    }
}

fn parse<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|raw| {
            raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value: raw,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.api_base, DEFAULT_API_URL);
        assert_eq!(config.directory.timeout, Duration::from_secs(10));
        assert_eq!(config.window_utc_offset_minutes, -180);
        assert!(config.supabase().is_none());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("NURA_API_URL", "https://api.nura.app/api/"),
            ("NURA_SUPABASE_URL", "https://xyz.supabase.co"),
            ("NURA_SUPABASE_ANON_KEY", "anon"),
            ("NURA_DIRECTORY_RETRIES", "4"),
            ("NURA_DIRECTORY_BACKOFF_MS", "250"),
            ("NURA_DIRECTORY_CACHE_TTL_SECS", "3600"),
            ("NURA_PLAN_FAILURE_POLICY", "downgrade"),
            ("NURA_DATA_DIR", "  "),
        ])
        .unwrap();

        assert_eq!(config.api_base, "https://api.nura.app/api");
        assert_eq!(config.supabase(), Some(("https://xyz.supabase.co", "anon")));
        assert_eq!(config.directory.max_retries, 4);
        assert_eq!(config.directory.backoff_step, Duration::from_millis(250));
        assert_eq!(config.directory.cache_ttl, Some(Duration::from_secs(3600)));
        assert_eq!(config.plan_failure_policy, PlanFailurePolicy::Downgrade);
        assert_eq!(config.data_dir, None);
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("NURA_DIRECTORY_TIMEOUT_MS", "ten")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "NURA_DIRECTORY_TIMEOUT_MS",
                ..
            }
        ));
    }

    #[test]
    fn test_invalid_policy() {
        assert!(load(&[("NURA_PLAN_FAILURE_POLICY", "optimistic")]).is_err());
    }

    #[test]
    fn test_window_offset_range() {
        let config = load(&[("NURA_WINDOW_UTC_OFFSET_MINUTES", "330")]).unwrap();
        assert_eq!(config.window_utc_offset_minutes, 330);

        for raw in ["1440", "-1440", "40000000", "-2147483648"] {
            let err = load(&[("NURA_WINDOW_UTC_OFFSET_MINUTES", raw)]).unwrap_err();
            assert!(matches!(
                err,
                ConfigError::Invalid {
                    key: "NURA_WINDOW_UTC_OFFSET_MINUTES",
                    ..
                }
            ));
        }
    }
}
