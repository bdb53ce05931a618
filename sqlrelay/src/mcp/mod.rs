//! The session protocol surface: JSON-RPC message types, method dispatch,
//! the session registry, and the SSE transport that ties them together.

pub mod http_transport;
pub mod server;
pub mod session;
pub mod types;

pub use server::McpServer;
pub use session::{SessionHandle, SessionRegistry};
pub use types::{McpError, McpRequest, McpResponse, ToolDefinition};
