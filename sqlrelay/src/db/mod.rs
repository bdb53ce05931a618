//! Upstream database access.
//!
//! Two layers: the connector seam ([`DatabaseConnector`] / [`DatabaseHandle`])
//! that hides the concrete driver, and the [`ConnectionManager`] that owns the
//! single shared connection and its token lifecycle.

pub mod connector;
pub mod manager;

pub use connector::{DatabaseConnector, DatabaseHandle, JsonRow, PgConnector};
pub use manager::ConnectionManager;
