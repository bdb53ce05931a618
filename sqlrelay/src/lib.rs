//! sqlrelay - session-oriented MCP gateway for read-only SQL operations.
//!
//! Exposes three database operations (run a SELECT, list tables, describe a
//! table) to a remote agent platform over an SSE-based session protocol and
//! a legacy REST surface. The relay holds no database password: it exchanges
//! client credentials for short-lived bearer tokens and maintains a single
//! shared upstream connection whose token is refreshed before expiry.
//!
//! Module map:
//! - [`auth`]: token acquisition from the identity provider
//! - [`db`]: connector seam and shared-connection manager
//! - [`tools`]: the three operations, their validation and envelopes
//! - [`mcp`]: protocol types, dispatch, sessions, and the HTTP/SSE transport
//! - [`guard`]: credential and rate-limit checks ahead of routing

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod guard;
pub mod mcp;
pub mod tools;

pub use config::RelayConfig;
pub use errors::{RelayError, RelayResult};
pub use mcp::http_transport::run;

pub const SERVICE_NAME: &str = "sqlrelay";
