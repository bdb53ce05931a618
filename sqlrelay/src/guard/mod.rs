//! Ordered request checks applied before routing.
//!
//! Credential first, then rate accounting; the first failure wins. The
//! health path never goes through the guard (the transport layers it onto
//! the protected routes only). Guard rejections are direct HTTP responses,
//! never stream frames, since no session context exists at this point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dashmap::DashMap;
use serde_json::json;

use crate::config::RateLimitSettings;
use crate::errors::RelayError;
use crate::mcp::http_transport::AppState;

/// Rate key used when no credential accompanies the request.
const ANONYMOUS_KEY: &str = "anonymous";

pub struct AccessGuard {
    api_key: Option<String>,
    limiter: Option<RateLimiter>,
}

impl AccessGuard {
    pub fn new(api_key: Option<String>, settings: RateLimitSettings) -> Self {
        if api_key.is_none() {
            tracing::warn!("no API key configured; requests are not authenticated");
        }
        let limiter = settings.enabled.then(|| RateLimiter::new(settings));
        Self { api_key, limiter }
    }

    pub fn check(&self, headers: &HeaderMap, query: &str) -> Result<(), RelayError> {
        let presented = extract_credential(headers, query);

        if let Some(expected) = &self.api_key {
            match &presented {
                None => return Err(RelayError::Unauthorized),
                Some(given) if given != expected => return Err(RelayError::Forbidden),
                Some(_) => {}
            }
        }

        if let Some(limiter) = &self.limiter {
            limiter.check(presented.as_deref().unwrap_or(ANONYMOUS_KEY))?;
        }

        Ok(())
    }
}

/// Precedence: dedicated header, then bearer token, then query parameter.
fn extract_credential(headers: &HeaderMap, query: &str) -> Option<String> {
    if let Some(value) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(value.to_string());
    }
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    query_param(query, "apiKey")
}

fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name)
            .then(|| urlencoding::decode(value).ok())
            .flatten()
            .map(|v| v.into_owned())
    })
}

struct RateWindow {
    started: Instant,
    count: u32,
}

/// Per-key fixed-window counters.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    fn new(settings: RateLimitSettings) -> Self {
        Self {
            max_requests: settings.max_requests,
            window: settings.window,
            windows: DashMap::new(),
        }
    }

    fn check(&self, key: &str) -> Result<(), RelayError> {
        let mut entry = self.windows.entry(key.to_string()).or_insert(RateWindow {
            started: Instant::now(),
            count: 0,
        });

        if entry.started.elapsed() >= self.window {
            entry.started = Instant::now();
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            let remaining = self.window.saturating_sub(entry.started.elapsed());
            return Err(RelayError::RateLimited {
                retry_after_secs: remaining.as_secs().max(1),
            });
        }

        entry.count += 1;
        Ok(())
    }
}

/// Middleware layered onto every protected route.
pub async fn check_request(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let query = request.uri().query().unwrap_or("");
    if let Err(err) = state.guard.check(request.headers(), query) {
        tracing::debug!(path = %request.uri().path(), "request rejected: {}", err);
        return rejection_response(err);
    }
    next.run(request).await
}

fn rejection_response(err: RelayError) -> Response {
    let (status, retry_after) = match &err {
        RelayError::Unauthorized => (StatusCode::UNAUTHORIZED, None),
        RelayError::Forbidden => (StatusCode::FORBIDDEN, None),
        RelayError::RateLimited { retry_after_secs } => {
            (StatusCode::TOO_MANY_REQUESTS, Some(*retry_after_secs))
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, None),
    };

    let mut response = (
        status,
        Json(json!({ "success": false, "error": err.to_string() })),
    )
        .into_response();
    if let Some(secs) = retry_after {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}
