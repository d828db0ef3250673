//! Database adapter exposed to scripts.
//!
//! Wraps a pooled sqlx `Any` connection so the configured driver is chosen at
//! runtime. Every result column is coerced into a [`CellValue`] according to
//! its declared type, and rows keep result-set column order.

mod row;

pub use row::{CellValue, OrderedRow};

use std::sync::Once;

use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Row, TypeInfo};
use tracing::{debug, error, info};

use crate::config::DatabaseConfig;
use crate::{BridgeError, Result};

/// A positional argument bound into a parameterized statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecResult {
    pub last_insert_id: i64,
    pub rows_affected: u64,
}

/// Portable kind a column is coerced into, derived from its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Bool,
    Integer,
    Float,
}

impl ColumnKind {
    /// Map a driver type name. Unknown types are treated as text.
    pub fn from_type_name(name: &str) -> Self {
        match name.trim().to_uppercase().as_str() {
            "BOOL" | "BOOLEAN" => Self::Bool,
            "INT" | "INT2" | "INT4" | "INT8" | "SMALLINT" | "INTEGER" | "BIGINT" | "TINYINT"
            | "MEDIUMINT" | "SERIAL" | "BIGSERIAL" => Self::Integer,
            "REAL" | "FLOAT" | "FLOAT4" | "FLOAT8" | "DOUBLE" | "DOUBLE PRECISION" => Self::Float,
            _ => Self::Text,
        }
    }
}

static INSTALL_DRIVERS: Once = Once::new();

/// Pooled, concurrency-safe database handle. Cloning shares the pool.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    /// Connect using the configured driver and verify the server is reachable.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        Self::connect_url(&config.url(), config.max_connections).await
    }

    /// Connect to a sqlx connection URL.
    ///
    /// In-memory SQLite databases live per connection, so they get a single
    /// pooled connection regardless of `max_connections`.
    pub async fn connect_url(url: &str, max_connections: u32) -> Result<Self> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        let max_connections = if is_sqlite_memory(url) {
            1
        } else {
            max_connections.max(1)
        };

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| BridgeError::DatabaseConnection(e.to_string()))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::DatabaseConnection(e.to_string()))?;

        info!("Database connection established");
        Ok(Self { pool })
    }

    /// Underlying pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Run a query and return its rows.
    pub async fn try_query(&self, sql: &str, args: &[SqlArg]) -> Result<Vec<OrderedRow>> {
        let rows = bind_args(sqlx::query(sql), args)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(to_ordered_row).collect()
    }

    /// Run a query; errors are logged and yield no rows.
    pub async fn query(&self, sql: &str, args: &[SqlArg]) -> Vec<OrderedRow> {
        match self.try_query(sql, args).await {
            Ok(rows) => {
                debug!("Query returned {} row(s)", rows.len());
                rows
            }
            Err(e) => {
                error!("Error querying db: {}", e);
                Vec::new()
            }
        }
    }

    /// Execute a statement.
    pub async fn try_exec(&self, sql: &str, args: &[SqlArg]) -> Result<ExecResult> {
        let result = bind_args(sqlx::query(sql), args)
            .execute(&self.pool)
            .await?;

        Ok(ExecResult {
            last_insert_id: result.last_insert_id().unwrap_or(0),
            rows_affected: result.rows_affected(),
        })
    }

    /// Execute a statement; errors are logged and yield `None`.
    pub async fn exec(&self, sql: &str, args: &[SqlArg]) -> Option<ExecResult> {
        match self.try_exec(sql, args).await {
            Ok(result) => Some(result),
            Err(e) => {
                error!("Error executing db query: {}", e);
                None
            }
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

fn bind_args<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    args: &[SqlArg],
) -> Query<'q, Any, AnyArguments<'q>> {
    for arg in args {
        query = match arg {
            SqlArg::Null => query.bind(None::<String>),
            SqlArg::Bool(b) => query.bind(*b),
            SqlArg::Int(i) => query.bind(*i),
            SqlArg::Float(f) => query.bind(*f),
            SqlArg::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

fn to_ordered_row(row: &AnyRow) -> Result<OrderedRow> {
    let columns = row.columns();
    let mut ordered = OrderedRow::with_capacity(columns.len());

    for (idx, column) in columns.iter().enumerate() {
        let kind = ColumnKind::from_type_name(column.type_info().name());
        ordered.push(column.name(), decode_cell(row, idx, kind)?);
    }

    Ok(ordered)
}

fn is_sqlite_memory(url: &str) -> bool {
    let url = url.trim().to_lowercase();
    url.starts_with("sqlite:") && (url.contains(":memory:") || url.contains("mode=memory"))
}

/// Decode column `idx` as `kind`.
///
/// Drivers without declared-type affinity (SQLite) may hand back a storage
/// class that differs from the declared type, so each kind falls back to the
/// neighbouring representations before giving up. Binary values read as
/// lossy UTF-8 text. NULL becomes the kind's zero value.
fn decode_cell(row: &AnyRow, idx: usize, kind: ColumnKind) -> Result<CellValue> {
    let value = match kind {
        ColumnKind::Bool => row
            .try_get::<Option<bool>, _>(idx)
            .map(|v| CellValue::Bool(v.unwrap_or_default()))
            .or_else(|_| {
                row.try_get::<Option<i64>, _>(idx)
                    .map(|v| CellValue::Bool(v.unwrap_or_default() != 0))
            }),
        ColumnKind::Integer => row
            .try_get::<Option<i64>, _>(idx)
            .map(|v| CellValue::Integer(v.unwrap_or_default()))
            .or_else(|_| {
                row.try_get::<Option<f64>, _>(idx)
                    .map(|v| CellValue::Integer(v.unwrap_or_default() as i64))
            }),
        ColumnKind::Float => row
            .try_get::<Option<f64>, _>(idx)
            .map(|v| CellValue::Float(v.unwrap_or_default()))
            .or_else(|_| {
                row.try_get::<Option<i64>, _>(idx)
                    .map(|v| CellValue::Float(v.unwrap_or_default() as f64))
            }),
        ColumnKind::Text => row
            .try_get::<Option<String>, _>(idx)
            .map(|v| CellValue::Text(v.unwrap_or_default()))
            .or_else(|_| {
                row.try_get::<Option<i64>, _>(idx)
                    .map(|v| CellValue::Text(v.map(|i| i.to_string()).unwrap_or_default()))
            })
            .or_else(|_| {
                row.try_get::<Option<f64>, _>(idx)
                    .map(|v| CellValue::Text(v.map(|f| f.to_string()).unwrap_or_default()))
            })
            .or_else(|_| {
                row.try_get::<Option<bool>, _>(idx)
                    .map(|v| CellValue::Text(v.map(|b| b.to_string()).unwrap_or_default()))
            })
            .or_else(|_| {
                row.try_get::<Option<Vec<u8>>, _>(idx).map(|v| {
                    CellValue::Text(
                        v.map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                            .unwrap_or_default(),
                    )
                })
            }),
    };

    value.map_err(BridgeError::from)
}
