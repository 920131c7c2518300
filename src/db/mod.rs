//! Database abstraction layer for db-fanout.
//!
//! Provides a trait-based interface for connecting to a target and streaming
//! every result set of a command into a [`ResultSink`], allowing different
//! database backends to be used interchangeably.

mod batch;
mod mock;
mod postgres;
mod sqlite;
mod types;

pub use mock::{MockConnector, MockResultSet, MockScript};
pub use postgres::PostgresConnector;
pub use sqlite::SqliteConnector;
pub use types::{
    ExecutionResult, InfoMessage, SemanticType, Table, TableColumn, TableRow, Value,
};

use std::sync::Arc;

use crate::config::ConnectionSettings;
use crate::error::Result;
use crate::target::Target;
use async_trait::async_trait;

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    Sqlite,
}

impl DatabaseBackend {
    /// Returns the backend as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parses a backend from a string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Returns the default port for this backend, if it is networked.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }
}

/// Creates the connector for the configured backend.
///
/// This is the central factory for target connections.
pub fn connector(settings: &ConnectionSettings) -> Arc<dyn Connector> {
    match settings.backend {
        DatabaseBackend::Postgres => Arc::new(PostgresConnector::new(settings.clone())),
        DatabaseBackend::Sqlite => Arc::new(SqliteConnector::new()),
    }
}

/// Opens connections to targets.
///
/// Every call opens a fresh, unpooled connection so each target's timing and
/// resource usage is independent.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection to the given target.
    async fn connect(&self, target: &Target) -> Result<Box<dyn TargetConnection>>;
}

/// An open connection to a single target.
#[async_trait]
pub trait TargetConnection: Send {
    /// Executes a command and streams every result set it produces into `sink`.
    async fn execute(&mut self, sql: &str, sink: &mut dyn ResultSink) -> Result<BatchSummary>;

    /// Closes the connection.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Receives the result sets of one command, in source order.
///
/// Every result set is announced by `start_result_set`, followed by one
/// `push_row` or `skip_row` per row and a closing `end_result_set`.
/// Diagnostic messages may arrive at any point.
pub trait ResultSink: Send {
    /// Begins a new result set with the given column metadata.
    fn start_result_set(&mut self, columns: Vec<TableColumn>);

    /// Whether rows should be converted and passed to `push_row`.
    ///
    /// When false, drivers call `skip_row` instead and never decode cells.
    fn retains_values(&self) -> bool {
        true
    }

    /// Adds a row to the current result set.
    fn push_row(&mut self, row: TableRow);

    /// Counts a row of the current result set without its values.
    fn skip_row(&mut self);

    /// Ends the current result set.
    fn end_result_set(&mut self);

    /// Supplies the columns of an earlier result set that had no rows.
    ///
    /// `index` is the result set's position within the command. Drivers
    /// call this after the command finished, once the columns are known.
    fn describe_result_set(&mut self, index: usize, columns: Vec<TableColumn>);

    /// Records a diagnostic message emitted during execution.
    fn info_message(&mut self, message: InfoMessage);
}

/// Side observations reported by a driver after a command completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Rows affected by non-row-returning statements, `None` for pure queries.
    pub rows_affected: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!(DatabaseBackend::parse("PostgreSQL"), Some(DatabaseBackend::Postgres));
        assert_eq!(DatabaseBackend::parse("sqlite3"), Some(DatabaseBackend::Sqlite));
        assert_eq!(DatabaseBackend::parse("oracle"), None);
    }

    #[test]
    fn test_backend_defaults() {
        assert_eq!(DatabaseBackend::default(), DatabaseBackend::Postgres);
        assert_eq!(DatabaseBackend::Postgres.default_port(), Some(5432));
        assert_eq!(DatabaseBackend::Sqlite.default_port(), None);
        assert_eq!(DatabaseBackend::Sqlite.as_str(), "sqlite");
    }
}
