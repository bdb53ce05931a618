//! The three database operations and their argument/envelope types.
//!
//! Both transports (the session protocol and the legacy REST surface) consume
//! these executors; neither carries its own query construction.

pub mod args;
pub mod executors;

pub use args::{ToolArguments, DESCRIBE_TABLE, LIST_TABLE, READ_DATA};
pub use executors::{
    describe_table, execute_read_query, list_tables, ColumnInfo, ErrorEnvelope, QueryEnvelope,
    TableDescriptionEnvelope, TableListEnvelope,
};
