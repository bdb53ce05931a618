//! Black-box tests driving the HTTP surface on an ephemeral port.
//!
//! The upstream is faked at the connector seam: these tests exercise the
//! guard, the session lifecycle, and the protocol routing, none of which
//! need a reachable database.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use sqlrelay::auth::{AccessToken, TokenProvider};
use sqlrelay::config::RateLimitSettings;
use sqlrelay::db::{ConnectionManager, DatabaseConnector, DatabaseHandle};
use sqlrelay::errors::{RelayError, RelayResult};
use sqlrelay::guard::AccessGuard;
use sqlrelay::mcp::http_transport::{build_router, AppState};
use sqlrelay::mcp::{McpServer, SessionRegistry};

struct NoIdentity;

#[async_trait]
impl TokenProvider for NoIdentity {
    async fn fetch_token(&self) -> RelayResult<AccessToken> {
        Err(RelayError::UpstreamAuth(
            "no identity provider in tests".to_string(),
        ))
    }
}

struct NoDatabase;

#[async_trait]
impl DatabaseConnector for NoDatabase {
    async fn connect(&self, _token: &str) -> RelayResult<Arc<dyn DatabaseHandle>> {
        Err(RelayError::UpstreamConnect("no database in tests".to_string()))
    }
}

async fn spawn_server(
    api_key: Option<&str>,
    rate_limit: RateLimitSettings,
) -> (String, Arc<AppState>) {
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(NoIdentity),
        Arc::new(NoDatabase),
    ));
    let server = Arc::new(McpServer::new("sqlrelay", "0.0.0-test", manager));
    let registry = Arc::new(SessionRegistry::new(server.clone()));
    let state = Arc::new(AppState {
        server,
        registry,
        guard: AccessGuard::new(api_key.map(str::to_string), rate_limit),
        allowed_origins: vec![],
    });

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

fn rpc(method: &str, id: u64, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Reads the next non-comment SSE frame as an (event, data) pair.
async fn next_event(response: &mut reqwest::Response, buffer: &mut String) -> (String, String) {
    loop {
        if let Some(pos) = buffer.find("\n\n") {
            let raw: String = buffer.drain(..pos + 2).collect();
            let mut event = String::new();
            let mut data = String::new();
            for line in raw.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event = rest.trim().to_string();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data.push_str(rest.trim());
                }
            }
            if event.is_empty() && data.is_empty() {
                continue;
            }
            return (event, data);
        }

        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .expect("timed out waiting for an SSE frame")
            .expect("stream error")
            .expect("stream ended unexpectedly");
        buffer.push_str(&String::from_utf8_lossy(&chunk));
    }
}

/// Opens a session stream and returns the stream plus the session id from
/// the bootstrap `endpoint` event.
async fn establish_session(
    client: &reqwest::Client,
    base: &str,
    api_key: &str,
) -> (reqwest::Response, String, String) {
    let mut response = client
        .get(format!("{base}/sse"))
        .header("x-api-key", api_key)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let mut buffer = String::new();
    let (event, data) = next_event(&mut response, &mut buffer).await;
    assert_eq!(event, "endpoint");
    let session_id = data
        .split("sessionId=")
        .nth(1)
        .expect("endpoint event carries a session id")
        .to_string();
    (response, buffer, session_id)
}

#[tokio::test]
async fn health_is_open_even_with_a_key_configured() {
    let (base, _state) = spawn_server(Some("k"), RateLimitSettings::default()).await;

    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "sqlrelay");
    assert!(body["timestamp"].as_str().is_some());
    assert!(body["version"].as_str().is_some());
}

#[tokio::test]
async fn missing_credential_is_unauthorized() {
    let (base, _state) = spawn_server(Some("k"), RateLimitSettings::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/api/list_table"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn wrong_key_on_establishment_creates_no_session() {
    let (base, state) = spawn_server(Some("k"), RateLimitSettings::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/sse"))
        .header("x-api-key", "wrong")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    assert_eq!(state.registry.len().await, 0);
}

#[tokio::test]
async fn one_shot_without_session_id_is_rejected() {
    let (base, _state) = spawn_server(Some("k"), RateLimitSettings::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/sse"))
        .header("x-api-key", "k")
        .json(&rpc("tools/list", 1, json!({})))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], json!(false));
    assert!(body["error"].as_str().unwrap().contains("session id"));
}

#[tokio::test]
async fn one_shot_with_unknown_session_is_not_found() {
    let (base, _state) = spawn_server(Some("k"), RateLimitSettings::default()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/sse"))
        .header("x-api-key", "k")
        .header("x-mcp-session-id", "no-such-session")
        .json(&rpc("tools/list", 1, json!({})))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn establish_then_list_tools_over_the_stream() {
    let (base, _state) = spawn_server(Some("k"), RateLimitSettings::default()).await;
    let client = reqwest::Client::new();

    let (mut stream, mut buffer, session_id) = establish_session(&client, &base, "k").await;

    let ack = client
        .post(format!("{base}/sse"))
        .header("x-api-key", "k")
        .header("x-mcp-session-id", &session_id)
        .json(&rpc("tools/list", 1, json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(ack.status(), 202);

    let (event, data) = next_event(&mut stream, &mut buffer).await;
    assert_eq!(event, "message");
    let response: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(response["id"], json!(1));
    let tools = response["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["read_data", "list_table", "describe_table"]);
}

#[tokio::test]
async fn validation_errors_ride_the_stream_as_error_envelopes() {
    let (base, _state) = spawn_server(Some("k"), RateLimitSettings::default()).await;
    let client = reqwest::Client::new();

    let (mut stream, mut buffer, session_id) = establish_session(&client, &base, "k").await;

    let ack = client
        .post(format!("{base}/sse"))
        .header("x-api-key", "k")
        .header("x-mcp-session-id", &session_id)
        .json(&rpc(
            "tools/call",
            2,
            json!({ "name": "read_data", "arguments": { "query": "DROP TABLE users" } }),
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(ack.status(), 202);

    let (_, data) = next_event(&mut stream, &mut buffer).await;
    let response: Value = serde_json::from_str(&data).unwrap();
    assert_eq!(response["result"]["isError"], json!(true));
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    assert!(text.contains("SELECT"));
}

#[tokio::test]
async fn session_id_query_parameter_is_a_fallback() {
    let (base, _state) = spawn_server(Some("k"), RateLimitSettings::default()).await;
    let client = reqwest::Client::new();

    let (_stream, _buffer, session_id) = establish_session(&client, &base, "k").await;

    let ack = client
        .post(format!("{base}/sse?sessionId={session_id}&apiKey=k"))
        .json(&rpc("ping", 3, json!({})))
        .send()
        .await
        .unwrap();
    assert_eq!(ack.status(), 202);
}

#[tokio::test]
async fn closing_the_stream_removes_the_session() {
    let (base, state) = spawn_server(Some("k"), RateLimitSettings::default()).await;
    let client = reqwest::Client::new();

    let (stream, _buffer, session_id) = establish_session(&client, &base, "k").await;
    assert!(state.registry.get(&session_id).await.is_some());

    drop(stream);

    let mut removed = false;
    for _ in 0..100 {
        if state.registry.get(&session_id).await.is_none() {
            removed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(removed, "session lingered after its stream closed");
}

#[tokio::test]
async fn rate_limit_answers_with_retry_after() {
    let settings = RateLimitSettings {
        enabled: true,
        max_requests: 2,
        window: Duration::from_secs(60),
    };
    let (base, _state) = spawn_server(Some("k"), settings).await;
    let client = reqwest::Client::new();

    for _ in 0..2 {
        let response = client
            .post(format!("{base}/api/list_table"))
            .header("x-api-key", "k")
            .json(&json!({}))
            .send()
            .await
            .unwrap();
        assert_ne!(response.status(), 429);
    }

    let limited = client
        .post(format!("{base}/api/list_table"))
        .header("x-api-key", "k")
        .json(&json!({}))
        .send()
        .await
        .unwrap();

    assert_eq!(limited.status(), 429);
    assert!(limited.headers().get("retry-after").is_some());
}
