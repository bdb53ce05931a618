//! Operation argument validation.
//!
//! Arguments arrive as untyped JSON from both transports and are folded into
//! a tagged sum here, before any connection work happens. A request that
//! fails validation never reaches the database.

use serde_json::Value;

use crate::errors::{RelayError, RelayResult};

pub const READ_DATA: &str = "read_data";
pub const LIST_TABLE: &str = "list_table";
pub const DESCRIBE_TABLE: &str = "describe_table";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolArguments {
    ReadData { query: String },
    ListTable { schemas: Vec<String> },
    DescribeTable { table_name: String },
}

impl ToolArguments {
    pub fn parse(tool: &str, args: &Value) -> RelayResult<Self> {
        match tool {
            READ_DATA => {
                let query = args
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayError::Validation("'query' must be a string".into()))?;
                let trimmed = query.trim();
                // The SELECT prefix is the entire injection boundary: callers
                // are trusted to submit read statements and the body runs
                // verbatim against the database.
                if !trimmed.to_uppercase().starts_with("SELECT") {
                    return Err(RelayError::Validation(
                        "only SELECT statements are allowed".into(),
                    ));
                }
                Ok(Self::ReadData {
                    query: trimmed.to_string(),
                })
            }
            LIST_TABLE => {
                let schemas = match args.get("parameters") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|item| {
                            item.as_str().map(str::to_string).ok_or_else(|| {
                                RelayError::Validation(
                                    "'parameters' must be an array of strings".into(),
                                )
                            })
                        })
                        .collect::<RelayResult<Vec<_>>>()?,
                    Some(_) => {
                        return Err(RelayError::Validation(
                            "'parameters' must be an array of strings".into(),
                        ))
                    }
                };
                Ok(Self::ListTable { schemas })
            }
            DESCRIBE_TABLE => {
                let table_name = args
                    .get("tableName")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RelayError::Validation("'tableName' must be a string".into()))?;
                Ok(Self::DescribeTable {
                    table_name: table_name.to_string(),
                })
            }
            other => Err(RelayError::Validation(format!("unknown tool: {}", other))),
        }
    }
}
