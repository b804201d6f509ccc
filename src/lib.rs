pub mod api;
pub mod app;
pub mod billing;
pub mod config;
pub mod navigation;
pub mod preferences;
pub mod storage;
pub mod utils;

pub use app::AppState;
pub use config::{AppConfig, ConfigError};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber
///
/// Filter comes from RUST_LOG; default is warn for dependencies and info for
/// this crate. Use RUST_LOG=nura_client=debug for per-operation logs.
/// Calling this more than once is harmless.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,nura_client=info")),
        )
        .try_init();
}
