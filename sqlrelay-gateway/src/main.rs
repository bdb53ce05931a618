use std::time::Duration;

use clap::Parser;

use sqlrelay::config::{DatabaseSettings, IdentitySettings, RateLimitSettings, RelayConfig};

#[derive(Parser)]
#[command(name = "sqlrelay-gateway")]
#[command(version)]
#[command(about = "SSE/MCP gateway exposing read-only SQL operations")]
struct Cli {
    #[arg(long, env = "DB_SERVER")]
    db_server: String,

    #[arg(long, env = "DB_NAME")]
    db_name: String,

    /// Principal name presented to the database alongside the bearer token.
    #[arg(long, env = "DB_USER")]
    db_user: String,

    #[arg(long, env = "CONNECT_TIMEOUT_SECONDS", default_value = "30")]
    connect_timeout_seconds: u64,

    #[arg(long, env = "TRUST_SERVER_CERTIFICATE", default_value = "false")]
    trust_server_certificate: bool,

    #[arg(long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Comma-separated allowed cross-origin sources; empty allows any.
    #[arg(long, env = "ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    #[arg(long, env = "API_KEY")]
    api_key: Option<String>,

    #[arg(long, env = "RATE_LIMIT_ENABLED", default_value = "false")]
    rate_limit_enabled: bool,

    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value = "100")]
    rate_limit_max_requests: u32,

    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value = "60000")]
    rate_limit_window_ms: u64,

    #[arg(long, env = "AZURE_TENANT_ID")]
    tenant_id: String,

    #[arg(long, env = "AZURE_CLIENT_ID")]
    client_id: String,

    #[arg(long, env = "AZURE_CLIENT_SECRET")]
    client_secret: String,

    #[arg(long, env = "TOKEN_SCOPE", default_value = sqlrelay::auth::DEFAULT_TOKEN_SCOPE)]
    token_scope: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = RelayConfig {
        port: cli.port,
        allowed_origins: cli
            .allowed_origins
            .into_iter()
            .filter(|o| !o.is_empty())
            .collect(),
        api_key: cli.api_key,
        rate_limit: RateLimitSettings {
            enabled: cli.rate_limit_enabled,
            max_requests: cli.rate_limit_max_requests,
            window: Duration::from_millis(cli.rate_limit_window_ms),
        },
        database: DatabaseSettings {
            server: cli.db_server,
            database: cli.db_name,
            user: cli.db_user,
            connect_timeout: Duration::from_secs(cli.connect_timeout_seconds),
            trust_server_certificate: cli.trust_server_certificate,
        },
        identity: IdentitySettings {
            tenant_id: cli.tenant_id,
            client_id: cli.client_id,
            client_secret: cli.client_secret,
            token_scope: cli.token_scope,
        },
    };

    if let Err(e) = sqlrelay::run(config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
