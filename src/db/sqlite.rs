//! SQLite driver implementation.
//!
//! Each target's `database` is the path of an existing SQLite file; the
//! `server` is only a label.

use crate::db::batch::{self, DecodeRow};
use crate::db::{
    BatchSummary, Connector, ResultSink, SemanticType, TableColumn, TableRow, TargetConnection,
    Value,
};
use crate::error::{FanoutError, Result};
use crate::target::Target;
use async_trait::async_trait;
use sqlparser::dialect::SQLiteDialect;
use sqlx::sqlite::{Sqlite, SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{
    Column as SqlxColumn, Connection, Decode, Executor, Row as SqlxRow, TypeInfo, ValueRef,
};
use tracing::debug;

/// Opens SQLite database files.
#[derive(Debug, Clone, Default)]
pub struct SqliteConnector;

impl SqliteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn TargetConnection>> {
        let options = SqliteConnectOptions::new()
            .filename(&target.database)
            .create_if_missing(false);

        debug!("{} Opening database file", target.log_prefix());
        let conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| {
                FanoutError::connection(format!(
                    "Cannot open SQLite database '{}': {e}",
                    target.database
                ))
            })?;

        Ok(Box::new(SqliteTargetConnection { conn }))
    }
}

/// An open connection to one SQLite file.
#[derive(Debug)]
pub struct SqliteTargetConnection {
    conn: SqliteConnection,
}

#[async_trait]
impl TargetConnection for SqliteTargetConnection {
    async fn execute(&mut self, sql: &str, sink: &mut dyn ResultSink) -> Result<BatchSummary> {
        let plan = batch::classify_batch(sql, &SQLiteDialect {});
        let stream = sqlx::raw_sql(sql).fetch_many(&mut self.conn);
        let drained =
            batch::drain_batch(stream, plan.as_deref(), sink, batch::command_error).await?;

        for empty in drained.undescribed {
            match (&mut self.conn).describe(empty.sql.as_str()).await {
                Ok(described) => {
                    let columns = described
                        .columns()
                        .iter()
                        .map(|col| TableColumn::from_type_name(col.name(), col.type_info().name()))
                        .collect();
                    sink.describe_result_set(empty.index, columns);
                }
                Err(e) => debug!("Could not describe result set {}: {e}", empty.index + 1),
            }
        }

        Ok(drained.summary)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.conn
            .close()
            .await
            .map_err(|e| FanoutError::connection(format!("Failed to close database: {e}")))
    }
}

impl DecodeRow for SqliteRow {
    fn table_columns(&self) -> Vec<TableColumn> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(i, col)| {
                let declared = SemanticType::from_type_name(col.type_info().name());
                // Expressions carry no declared type; start from the first row's
                // storage class and let the table settle it.
                let data_type = match declared {
                    SemanticType::Null | SemanticType::Other => {
                        storage_type(self, i).unwrap_or(declared)
                    }
                    _ => declared,
                };
                TableColumn::new(col.name(), data_type)
            })
            .collect()
    }

    fn table_row(&self, columns: &[TableColumn]) -> TableRow {
        columns
            .iter()
            .enumerate()
            .map(|(i, col)| convert_value(self, i, col.data_type))
            .collect()
    }
}

/// Storage class of a cell, `None` for NULL.
fn storage_type(row: &SqliteRow, index: usize) -> Option<SemanticType> {
    match row.try_get_raw(index) {
        Ok(raw) if !raw.is_null() => Some(SemanticType::from_type_name(raw.type_info().name())),
        _ => None,
    }
}

/// Converts a cell by its storage class, refined by the column type.
///
/// Cells whose storage class the column type cannot absorb keep their own
/// type; [`Table::new`](crate::db::Table::new) widens the column for them.
fn convert_value(row: &SqliteRow, index: usize, declared: SemanticType) -> Value {
    let Some(storage) = storage_type(row, index) else {
        return Value::Null;
    };

    match (storage, declared) {
        (SemanticType::Integer, SemanticType::Boolean) => decode(row, index, Value::Bool),
        (SemanticType::Integer, SemanticType::Float) => {
            decode(row, index, |n: i64| Value::Float(n as f64))
        }
        (SemanticType::Integer, _) => decode(row, index, Value::Int),
        (SemanticType::Float, _) => decode(row, index, Value::Float),
        (SemanticType::Binary, _) => decode(row, index, Value::Bytes),
        (_, SemanticType::DateTime) => decode(row, index, Value::DateTime),
        _ => decode(row, index, Value::String),
    }
}

fn decode<'r, T>(row: &'r SqliteRow, index: usize, wrap: fn(T) -> Value) -> Value
where
    T: Decode<'r, Sqlite>,
{
    row.try_get_unchecked::<T, _>(index)
        .map(wrap)
        .unwrap_or(Value::Null)
}
