//! Connector seam and the tokio-postgres implementation.
//!
//! Executors only ever see [`DatabaseHandle`]: rows come back as JSON objects
//! keyed by column name, parameters are passed as strings (the one bound
//! parameter in this system is a table name). The production implementation
//! authenticates with a bearer token presented as the password, the
//! managed-database pattern where the credential is minted per connection
//! rather than stored.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_postgres::config::SslMode;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::Row;

use crate::config::DatabaseSettings;
use crate::errors::{RelayError, RelayResult};

pub type JsonRow = serde_json::Map<String, Value>;

#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Whether the underlying wire session is still usable.
    fn is_connected(&self) -> bool;

    async fn query(&self, sql: &str, params: &[&str]) -> RelayResult<Vec<JsonRow>>;
}

#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    async fn connect(&self, token: &str) -> RelayResult<Arc<dyn DatabaseHandle>>;
}

pub struct PgConnector {
    settings: DatabaseSettings,
}

impl PgConnector {
    pub fn new(settings: DatabaseSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl DatabaseConnector for PgConnector {
    async fn connect(&self, token: &str) -> RelayResult<Arc<dyn DatabaseHandle>> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.settings.server)
            .dbname(&self.settings.database)
            .user(&self.settings.user)
            .password(token)
            .ssl_mode(SslMode::Require)
            .connect_timeout(self.settings.connect_timeout);

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(self.settings.trust_server_certificate)
            .build()
            .map_err(|e| RelayError::UpstreamConnect(format!("TLS setup failed: {}", e)))?;
        let tls = postgres_native_tls::MakeTlsConnector::new(tls);

        let (client, connection) = config.connect(tls).await.map_err(|e| {
            RelayError::UpstreamConnect(format!(
                "connect to {} failed: {}",
                self.settings.server, e
            ))
        })?;

        // The driver task owns the socket; it ends when the client drops.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!("database connection terminated: {}", e);
            }
        });

        tracing::info!(server = %self.settings.server, "database connection opened");
        Ok(Arc::new(PgHandle { client }))
    }
}

struct PgHandle {
    client: tokio_postgres::Client,
}

#[async_trait]
impl DatabaseHandle for PgHandle {
    fn is_connected(&self) -> bool {
        !self.client.is_closed()
    }

    async fn query(&self, sql: &str, params: &[&str]) -> RelayResult<Vec<JsonRow>> {
        let bound: Vec<&(dyn ToSql + Sync)> =
            params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
        let rows = self
            .client
            .query(sql, &bound)
            .await
            .map_err(|e| RelayError::Execution(e.to_string()))?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

/// Converts one row to a JSON object by declared column type. Types without a
/// JSON mapping surface as null rather than failing the whole result set.
fn row_to_json(row: &Row) -> JsonRow {
    let mut out = JsonRow::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let value = match *col.type_() {
            Type::BOOL => row
                .try_get::<_, Option<bool>>(idx)
                .map(|v| v.map(Value::from)),
            Type::INT2 => row
                .try_get::<_, Option<i16>>(idx)
                .map(|v| v.map(Value::from)),
            Type::INT4 => row
                .try_get::<_, Option<i32>>(idx)
                .map(|v| v.map(Value::from)),
            Type::INT8 => row
                .try_get::<_, Option<i64>>(idx)
                .map(|v| v.map(Value::from)),
            Type::FLOAT4 => row
                .try_get::<_, Option<f32>>(idx)
                .map(|v| v.map(Value::from)),
            Type::FLOAT8 => row
                .try_get::<_, Option<f64>>(idx)
                .map(|v| v.map(Value::from)),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => row
                .try_get::<_, Option<String>>(idx)
                .map(|v| v.map(Value::from)),
            Type::UUID => row
                .try_get::<_, Option<uuid::Uuid>>(idx)
                .map(|v| v.map(|u| Value::from(u.to_string()))),
            Type::TIMESTAMP => row
                .try_get::<_, Option<chrono::NaiveDateTime>>(idx)
                .map(|v| v.map(|t| Value::from(t.to_string()))),
            Type::TIMESTAMPTZ => row
                .try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
                .map(|v| v.map(|t| Value::from(t.to_rfc3339()))),
            Type::DATE => row
                .try_get::<_, Option<chrono::NaiveDate>>(idx)
                .map(|v| v.map(|d| Value::from(d.to_string()))),
            Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx),
            _ => row
                .try_get::<_, Option<String>>(idx)
                .map(|v| v.map(Value::from)),
        };
        let value = match value {
            Ok(Some(v)) => v,
            Ok(None) => Value::Null,
            Err(e) => {
                tracing::debug!(column = col.name(), "no JSON mapping for column: {}", e);
                Value::Null
            }
        };
        out.insert(col.name().to_string(), value);
    }
    out
}
