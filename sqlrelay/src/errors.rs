//! Error taxonomy for the relay.
//!
//! Variants fall into three groups: request-shape problems (`Validation`,
//! `MissingSessionId`, `SessionNotFound`), upstream problems (`UpstreamAuth`,
//! `UpstreamConnect`, `Execution`), and guard rejections (`Unauthorized`,
//! `Forbidden`, `RateLimited`). Transports decide how each group surfaces:
//! guard and session-resolution failures become direct HTTP responses,
//! everything raised inside an operation becomes an error envelope delivered
//! on whichever transport carried the request.

use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("token acquisition failed: {0}")]
    UpstreamAuth(String),
    #[error("database unreachable: {0}")]
    UpstreamConnect(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("missing credential")]
    Unauthorized,
    #[error("invalid credential")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },
    #[error("missing session id")]
    MissingSessionId,
    #[error("session not found: {0}")]
    SessionNotFound(String),
}

impl From<tokio_postgres::Error> for RelayError {
    fn from(e: tokio_postgres::Error) -> Self {
        RelayError::Execution(e.to_string())
    }
}
