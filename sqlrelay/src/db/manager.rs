//! Shared connection lifecycle.
//!
//! One live handle exists process-wide. Every acquisition runs the whole
//! check-then-refresh sequence under a single mutex, so concurrent callers
//! coalesce on one refresh instead of racing to open duplicate connections
//! or tear down a handle twice.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::auth::TokenProvider;
use crate::db::connector::{DatabaseConnector, DatabaseHandle};
use crate::errors::RelayResult;

/// Minimum remaining token validity before a proactive refresh.
const SAFETY_MARGIN_SECS: i64 = 120;

struct ConnState {
    handle: Option<Arc<dyn DatabaseHandle>>,
    // The token itself lives inside the authenticated wire session; only its
    // expiry matters after connect.
    token_expires_at: DateTime<Utc>,
}

pub struct ConnectionManager {
    provider: Arc<dyn TokenProvider>,
    connector: Arc<dyn DatabaseConnector>,
    state: Mutex<ConnState>,
}

impl ConnectionManager {
    pub fn new(provider: Arc<dyn TokenProvider>, connector: Arc<dyn DatabaseConnector>) -> Self {
        Self {
            provider,
            connector,
            state: Mutex::new(ConnState {
                handle: None,
                token_expires_at: Utc::now(),
            }),
        }
    }

    /// Returns the shared handle, refreshing token and connection when the
    /// handle is gone, reports disconnected, or the token is inside the
    /// safety margin. A still-valid handle is returned without any network
    /// call.
    pub async fn acquire(&self) -> RelayResult<Arc<dyn DatabaseHandle>> {
        let mut state = self.state.lock().await;

        if let Some(handle) = &state.handle {
            let remaining = state.token_expires_at - Utc::now();
            if handle.is_connected() && remaining > Duration::seconds(SAFETY_MARGIN_SECS) {
                return Ok(handle.clone());
            }
        }

        let token = self.provider.fetch_token().await?;

        if let Some(old) = state.handle.take() {
            // Best-effort close: dropping the reference tears the wire down
            // once in-flight users release theirs.
            drop(old);
            tracing::debug!("replacing database connection");
        }

        let handle = self.connector.connect(&token.secret).await?;
        state.token_expires_at = token.expires_at;
        state.handle = Some(handle.clone());
        tracing::info!(expires_at = %token.expires_at, "database connection refreshed");
        Ok(handle)
    }

    /// Drops the live handle. Idempotent; used on process shutdown.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.handle.take().is_some() {
            tracing::info!("database connection closed");
        }
    }
}
