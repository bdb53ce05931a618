//! Protocol method dispatch.
//!
//! Maps JSON-RPC methods onto the query executors. Tool failures of any kind
//! (validation, connection, execution) become error-flagged envelopes inside
//! the MCP result; only an unknown method or malformed request reaches the
//! JSON-RPC error channel.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::db::ConnectionManager;
use crate::errors::RelayResult;
use crate::mcp::types::{McpRequest, McpResponse, ToolDefinition, METHOD_NOT_FOUND};
use crate::tools::{
    describe_table, execute_read_query, list_tables, ErrorEnvelope, ToolArguments, DESCRIBE_TABLE,
    LIST_TABLE, READ_DATA,
};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

pub struct McpServer {
    name: String,
    version: String,
    manager: Arc<ConnectionManager>,
}

impl McpServer {
    pub fn new(name: &str, version: &str, manager: Arc<ConnectionManager>) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            manager,
        }
    }

    /// The three operation descriptors. Field names and requiredness are
    /// external contract; changing them requires a version bump.
    pub fn tool_definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: READ_DATA.to_string(),
                description: "Execute a read-only SELECT query and return all rows".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "A SELECT statement to execute verbatim"
                        }
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: LIST_TABLE.to_string(),
                description: "List base tables, optionally filtered by schema names".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "parameters": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "Schema names to filter by"
                        }
                    }
                }),
            },
            ToolDefinition {
                name: DESCRIBE_TABLE.to_string(),
                description: "Return the column names and types of a table".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "tableName": {
                            "type": "string",
                            "description": "Name of the table to describe"
                        }
                    },
                    "required": ["tableName"]
                }),
            },
        ]
    }

    pub async fn handle_request(&self, request: McpRequest) -> McpResponse {
        let result = match request.method.as_str() {
            "initialize" => Ok(self.handle_initialize()),
            "notifications/initialized" => Ok(json!({})),
            "ping" => Ok(json!({ "pong": true })),
            "tools/list" => Ok(json!({ "tools": Self::tool_definitions() })),
            "tools/call" => Ok(self.handle_tools_call(&request.params).await),
            other => Err(format!("Method not found: {}", other)),
        };

        match result {
            Ok(value) => McpResponse::success(request.id, value),
            Err(message) => McpResponse::failure(request.id, METHOD_NOT_FOUND, message),
        }
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": self.name,
                "version": self.version
            }
        })
    }

    async fn handle_tools_call(&self, params: &Value) -> Value {
        let name = params.get("name").and_then(Value::as_str).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        match self.invoke_tool(name, &arguments).await {
            Ok(envelope) => json!({
                "content": [{
                    "type": "text",
                    "text": envelope.to_string()
                }]
            }),
            Err(err) => {
                tracing::warn!(tool = name, "tool invocation failed: {}", err);
                let envelope = serde_json::to_value(ErrorEnvelope::new(err.to_string()))
                    .unwrap_or_default();
                json!({
                    "content": [{
                        "type": "text",
                        "text": envelope.to_string()
                    }],
                    "isError": true
                })
            }
        }
    }

    /// Validates arguments, acquires the shared connection, and runs the
    /// matching executor. Validation happens first so a malformed request
    /// never touches the connection manager.
    pub async fn invoke_tool(&self, name: &str, arguments: &Value) -> RelayResult<Value> {
        let args = ToolArguments::parse(name, arguments)?;
        let handle = self.manager.acquire().await?;

        let envelope = match args {
            ToolArguments::ReadData { query } => {
                serde_json::to_value(execute_read_query(handle.as_ref(), &query).await?)
            }
            ToolArguments::ListTable { schemas } => {
                serde_json::to_value(list_tables(handle.as_ref(), &schemas).await?)
            }
            ToolArguments::DescribeTable { table_name } => {
                serde_json::to_value(describe_table(handle.as_ref(), &table_name).await?)
            }
        };

        Ok(envelope.unwrap_or_default())
    }
}
