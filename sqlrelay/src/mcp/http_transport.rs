//! SSE transport and HTTP surface.
//!
//! - GET /sse: establish a long-lived session stream
//! - POST /sse: submit a one-shot protocol message tagged with a session id
//! - GET /health: liveness probe, always open
//! - POST /api/{read_data,list_table,describe_table}: legacy direct-call
//!   variants of the same executors
//!
//! A session walks ESTABLISHING (stream accepted, not yet registered) to
//! OPEN (registered, accepting tagged messages) to CLOSED (stream dropped,
//! removed from the registry). CLOSED is terminal; an id is never reopened.
//! Protocol replies ride the stream; the one-shot POST only acknowledges
//! acceptance.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures::stream::{once, unfold, Stream, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::auth::EntraIdTokenProvider;
use crate::config::RelayConfig;
use crate::db::{ConnectionManager, PgConnector};
use crate::errors::RelayError;
use crate::guard::AccessGuard;
use crate::mcp::server::McpServer;
use crate::mcp::session::SessionRegistry;
use crate::mcp::types::McpRequest;
use crate::tools::{ErrorEnvelope, DESCRIBE_TABLE, LIST_TABLE, READ_DATA};
use crate::SERVICE_NAME;

/// Shared state for both transports.
pub struct AppState {
    pub server: Arc<McpServer>,
    pub registry: Arc<SessionRegistry>,
    pub guard: AccessGuard,
    pub allowed_origins: Vec<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.allowed_origins);

    let protected = Router::new()
        .route("/sse", get(handle_sse_open).post(handle_sse_message))
        .route("/api/read_data", post(handle_read_data))
        .route("/api/list_table", post(handle_list_table))
        .route("/api/describe_table", post(handle_describe_table))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            crate::guard::check_request,
        ));

    Router::new()
        .route("/health", get(handle_health))
        .merge(protected)
        .layer(cors)
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(parsed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Builds the full stack from configuration and serves until shutdown.
pub async fn run(config: RelayConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let provider = Arc::new(EntraIdTokenProvider::new(config.identity.clone()));
    let connector = Arc::new(PgConnector::new(config.database.clone()));
    let manager = Arc::new(ConnectionManager::new(provider, connector));

    // Probe the upstream once; a gateway that cannot reach its database
    // should fail at boot rather than serve dead sessions.
    manager.acquire().await?;
    tracing::info!(
        server = %config.database.server,
        database = %config.database.database,
        "database connection verified"
    );

    let server = Arc::new(McpServer::new(
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        manager.clone(),
    ));
    let registry = Arc::new(SessionRegistry::new(server.clone()));
    let state = Arc::new(AppState {
        server,
        registry,
        guard: AccessGuard::new(config.api_key.clone(), config.rate_limit.clone()),
        allowed_origins: config.allowed_origins.clone(),
    });

    let app = build_router(state);
    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    manager.shutdown().await;
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {}", err);
        return;
    }
    tracing::info!("shutdown signal received");
}

/// Liveness probe. Reports the service, never the database.
async fn handle_health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339(),
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Removes the session when its stream is dropped, however it ends.
struct DisconnectGuard {
    registry: Arc<SessionRegistry>,
    id: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let id = std::mem::take(&mut self.id);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { registry.remove(&id).await });
        }
    }
}

/// GET /sse - establish a session stream. The first frame is an `endpoint`
/// event telling the client where to submit messages for this session;
/// protocol responses follow as `message` events.
async fn handle_sse_open(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (handle, outbound) = state.registry.create().await;
    tracing::info!(session = %handle.id, "session established");

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/sse?sessionId={}", handle.id));

    let guard = DisconnectGuard {
        registry: state.registry.clone(),
        id: handle.id.clone(),
    };
    let responses = unfold((outbound, guard), |(mut rx, guard)| async move {
        match rx.recv().await {
            Some(response) => {
                let data = serde_json::to_string(&response).unwrap_or_default();
                let event = Event::default().event("message").data(data);
                Some((Ok::<_, Infallible>(event), (rx, guard)))
            }
            None => None,
        }
    });

    let stream = once(async move { Ok::<_, Infallible>(endpoint) }).chain(responses);
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct SseQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// POST /sse - submit a one-shot protocol message. The session id rides the
/// `x-mcp-session-id` header, falling back to the `sessionId` query
/// parameter.
async fn handle_sse_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SseQuery>,
    Json(body): Json<Value>,
) -> Response {
    let session_id = headers
        .get("x-mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(query.session_id);

    let Some(session_id) = session_id else {
        // No lookup is attempted without an identifier.
        return error_response(
            StatusCode::BAD_REQUEST,
            "missing session id: set the x-mcp-session-id header or sessionId query parameter",
        );
    };

    let request: McpRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, &format!("parse error: {}", e));
        }
    };

    let Some(session) = state.registry.get(&session_id).await else {
        return error_response(StatusCode::NOT_FOUND, "session not found");
    };

    match session.submit(request).await {
        Ok(()) => (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response(),
        // The worker is gone; treat the id as closed.
        Err(_) => error_response(StatusCode::NOT_FOUND, "session not found"),
    }
}

async fn handle_read_data(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Response {
    legacy_invoke(&state, READ_DATA, &body).await
}

async fn handle_list_table(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    legacy_invoke(&state, LIST_TABLE, &body).await
}

async fn handle_describe_table(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Response {
    legacy_invoke(&state, DESCRIBE_TABLE, &body).await
}

/// Direct-call variant: same executors, envelope in the HTTP response.
async fn legacy_invoke(state: &AppState, tool: &str, arguments: &Value) -> Response {
    match state.server.invoke_tool(tool, arguments).await {
        Ok(envelope) => (StatusCode::OK, Json(envelope)).into_response(),
        Err(err) => {
            let status = match &err {
                RelayError::Validation(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let envelope =
                serde_json::to_value(ErrorEnvelope::new(err.to_string())).unwrap_or_default();
            (status, Json(envelope)).into_response()
        }
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message })),
    )
        .into_response()
}
