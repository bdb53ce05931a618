//! Query executors and result envelopes.
//!
//! Three stateless translations from validated arguments to a SQL statement
//! and a normalized envelope. Driver failures propagate as execution errors
//! with the driver's message; nothing here retries.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::connector::DatabaseHandle;
use crate::errors::RelayResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryEnvelope {
    pub success: bool,
    pub data: Vec<Value>,
    pub record_count: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableListEnvelope {
    pub success: bool,
    pub tables: Vec<String>,
    pub count: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescriptionEnvelope {
    pub success: bool,
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub column_count: usize,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub timestamp: String,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            timestamp: now_rfc3339(),
        }
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Runs a caller-supplied SELECT verbatim and returns every row.
pub async fn execute_read_query(
    handle: &dyn DatabaseHandle,
    query: &str,
) -> RelayResult<QueryEnvelope> {
    let rows = handle.query(query, &[]).await?;
    Ok(QueryEnvelope {
        success: true,
        record_count: rows.len(),
        data: rows.into_iter().map(Value::Object).collect(),
        timestamp: now_rfc3339(),
    })
}

/// Lists base tables, optionally restricted to the given schemas, as
/// `schema.table` strings.
pub async fn list_tables(
    handle: &dyn DatabaseHandle,
    schemas: &[String],
) -> RelayResult<TableListEnvelope> {
    let mut sql = String::from(
        "SELECT table_schema, table_name FROM information_schema.tables \
         WHERE table_type = 'BASE TABLE'",
    );
    if !schemas.is_empty() {
        // Schema names come from a constrained operator vocabulary and are
        // joined as quoted literals; binding them instead is a known
        // hardening opportunity.
        let filter = schemas
            .iter()
            .map(|s| format!("'{}'", s))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" AND table_schema IN ({})", filter));
    }
    sql.push_str(" ORDER BY table_schema, table_name");

    let rows = handle.query(&sql, &[]).await?;
    let tables: Vec<String> = rows
        .iter()
        .filter_map(|row| {
            let schema = row.get("table_schema")?.as_str()?;
            let table = row.get("table_name")?.as_str()?;
            Some(format!("{}.{}", schema, table))
        })
        .collect();

    Ok(TableListEnvelope {
        success: true,
        count: tables.len(),
        tables,
        timestamp: now_rfc3339(),
    })
}

/// Returns the column name/type pairs of a table. A table that does not
/// exist yields an empty description, not an error; existence is never
/// validated here.
pub async fn describe_table(
    handle: &dyn DatabaseHandle,
    table_name: &str,
) -> RelayResult<TableDescriptionEnvelope> {
    const SQL: &str = "SELECT column_name, data_type FROM information_schema.columns \
                       WHERE table_name = $1 ORDER BY ordinal_position";

    let rows = handle.query(SQL, &[table_name]).await?;
    let columns: Vec<ColumnInfo> = rows
        .iter()
        .filter_map(|row| {
            Some(ColumnInfo {
                name: row.get("column_name")?.as_str()?.to_string(),
                data_type: row.get("data_type")?.as_str()?.to_string(),
            })
        })
        .collect();

    Ok(TableDescriptionEnvelope {
        success: true,
        table: table_name.to_string(),
        column_count: columns.len(),
        columns,
        timestamp: now_rfc3339(),
    })
}
