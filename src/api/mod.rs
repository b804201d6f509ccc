//! Remote APIs: the specialist directory and the Supabase tables

mod cache;
mod directory;
pub mod http_client;
mod notifications;
mod profiles;

pub use cache::DirectoryCache;
pub use directory::{
    build_query, normalize_base, unwrap_payload, DirectoryClient, DirectoryConfig,
    DirectoryError, DirectoryResponse, Endpoint, TRANSIENT_STATUSES,
};
pub use http_client::{HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use notifications::NotificationSettingsSource;
pub use profiles::{ProfileSource, SupabaseClient, SupabaseError, UnconfiguredBackend};
