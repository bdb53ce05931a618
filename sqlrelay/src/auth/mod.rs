//! Identity token acquisition for the upstream database.
//!
//! The relay never holds a database password. It exchanges client-credentials
//! material for a short-lived bearer token at the identity provider and
//! presents that token to the database; [`crate::db::ConnectionManager`]
//! decides when a fresh one is needed. The provider sits behind the
//! [`TokenProvider`] trait so tests can substitute a canned implementation.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::config::IdentitySettings;
use crate::errors::{RelayError, RelayResult};

/// Default scope for tokens addressed to a managed database service.
pub const DEFAULT_TOKEN_SCOPE: &str = "https://ossrdbms-aad.database.windows.net/.default";

/// An opaque bearer token plus the instant it stops being valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn remaining(&self) -> Duration {
        self.expires_at - Utc::now()
    }
}

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> RelayResult<AccessToken>;
}

/// Client-credentials flow against the Microsoft Entra ID token endpoint.
pub struct EntraIdTokenProvider {
    client: reqwest::Client,
    settings: IdentitySettings,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

impl EntraIdTokenProvider {
    pub fn new(settings: IdentitySettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn token_endpoint(&self) -> String {
        format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/token",
            self.settings.tenant_id
        )
    }
}

#[async_trait]
impl TokenProvider for EntraIdTokenProvider {
    async fn fetch_token(&self) -> RelayResult<AccessToken> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("scope", self.settings.token_scope.as_str()),
        ];

        let response = self
            .client
            .post(self.token_endpoint())
            .form(&params)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamAuth(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamAuth(format!(
                "token endpoint returned {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::UpstreamAuth(format!("malformed token response: {}", e)))?;

        Ok(AccessToken {
            secret: token.access_token,
            expires_at: Utc::now() + Duration::seconds(token.expires_in),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_endpoint_embeds_tenant() {
        let provider = EntraIdTokenProvider::new(IdentitySettings {
            tenant_id: "contoso".to_string(),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            token_scope: DEFAULT_TOKEN_SCOPE.to_string(),
        });
        assert_eq!(
            provider.token_endpoint(),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
    }

    #[test]
    fn remaining_reflects_expiry() {
        let token = AccessToken {
            secret: "tok".to_string(),
            expires_at: Utc::now() + Duration::seconds(600),
        };
        assert!(token.remaining() > Duration::seconds(590));

        let stale = AccessToken {
            secret: "tok".to_string(),
            expires_at: Utc::now() - Duration::seconds(5),
        };
        assert!(stale.remaining() < Duration::zero());
    }
}
