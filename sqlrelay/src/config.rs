//! Runtime configuration.
//!
//! Plain data, filled in once at process start by the gateway binary (which
//! owns flag/environment parsing) and handed to [`crate::run`]. Nothing here
//! is re-read after startup.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Allowed cross-origin sources; empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Expected credential; `None` runs the guard in insecure mode.
    pub api_key: Option<String>,
    pub rate_limit: RateLimitSettings,
    pub database: DatabaseSettings,
    pub identity: IdentitySettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub server: String,
    pub database: String,
    /// Principal name presented to the database alongside the bearer token.
    pub user: String,
    pub connect_timeout: Duration,
    pub trust_server_certificate: bool,
}

/// Client-credentials material for the identity provider.
#[derive(Debug, Clone)]
pub struct IdentitySettings {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_scope: String,
}

#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: 100,
            window: Duration::from_millis(60_000),
        }
    }
}
