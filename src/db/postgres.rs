//! PostgreSQL driver implementation.
//!
//! Provides the `PostgresConnector` that opens one unpooled sqlx
//! `PgConnection` per target and runs batches over the simple query protocol,
//! so multi-statement commands report every result set.

use crate::config::ConnectionSettings;
use crate::db::batch::{self, DecodeRow};
use crate::db::{
    BatchSummary, Connector, ResultSink, SemanticType, TableColumn, TableRow, TargetConnection,
    Value,
};
use crate::error::{FanoutError, Result};
use crate::target::Target;
use async_trait::async_trait;
use sqlparser::dialect::PostgreSqlDialect;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column as SqlxColumn, Connection, Executor, Row as SqlxRow, TypeInfo};
use tracing::debug;

/// Opens PostgreSQL connections to targets.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    settings: ConnectionSettings,
}

impl PostgresConnector {
    /// Creates a connector using the given credentials and defaults.
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    /// Builds the connect options for a target.
    ///
    /// Unset credentials fall back to sqlx's own `PGUSER`/`PGPASSWORD` handling.
    fn connect_options(&self, target: &Target) -> Result<PgConnectOptions> {
        let (host, port) = split_host_port(&target.server, self.settings.port)?;

        let mut options = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(&target.database)
            .application_name(&self.settings.application_name);

        if let Some(user) = &self.settings.user {
            options = options.username(user);
        }
        if let Some(password) = &self.settings.password {
            options = options.password(password);
        }

        Ok(options)
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn TargetConnection>> {
        let options = self.connect_options(target)?;

        debug!("{} Opening connection", target.log_prefix());
        let conn = PgConnection::connect_with(&options)
            .await
            .map_err(|e| map_connection_error(e, target))?;

        Ok(Box::new(PostgresConnection { conn }))
    }
}

/// An open connection to one PostgreSQL target.
#[derive(Debug)]
pub struct PostgresConnection {
    conn: PgConnection,
}

#[async_trait]
impl TargetConnection for PostgresConnection {
    async fn execute(&mut self, sql: &str, sink: &mut dyn ResultSink) -> Result<BatchSummary> {
        let plan = batch::classify_batch(sql, &PostgreSqlDialect {});
        let stream = sqlx::raw_sql(sql).fetch_many(&mut self.conn);
        let drained =
            batch::drain_batch(stream, plan.as_deref(), sink, format_command_error).await?;

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
            .map_err(|e| FanoutError::connection(format!("Failed to close connection: {e}")))
    }
}

impl DecodeRow for PgRow {
    fn table_columns(&self) -> Vec<TableColumn> {
        self.columns()
            .iter()
            .map(|col| TableColumn::from_type_name(col.name(), col.type_info().name()))
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

/// Converts one text-protocol cell to our Value type.
fn convert_value(row: &PgRow, index: usize, data_type: SemanticType) -> Value {
    // Simple-protocol rows are always in text format; sqlx decodes the `\x`
    // form of bytea itself.
    if data_type == SemanticType::Binary {
        return match row.try_get_unchecked::<Option<Vec<u8>>, _>(index) {
            Ok(Some(bytes)) => Value::Bytes(bytes),
            _ => Value::Null,
        };
    }

    match row.try_get_unchecked::<Option<String>, _>(index) {
        Ok(Some(text)) => Value::from_text(data_type, text),
        _ => Value::Null,
    }
}

/// Splits `host[:port]`, using `default_port` when no port is given.
fn split_host_port(server: &str, default_port: u16) -> Result<(&str, u16)> {
    match server.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port.parse::<u16>().map_err(|_| {
                FanoutError::connection(format!("Invalid port '{port}' in server '{server}'"))
            })?;
            Ok((host, port))
        }
        _ => Ok((server, default_port)),
    }
}

/// Maps sqlx connection errors to readable messages.
fn map_connection_error(error: sqlx::Error, target: &Target) -> FanoutError {
    let server = &target.server;
    let database = &target.database;

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        FanoutError::connection(format!(
            "Cannot connect to {server}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        FanoutError::connection(format!(
            "Authentication failed on {server}. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        FanoutError::connection(format!("Database '{database}' does not exist on {server}."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        FanoutError::connection(format!("TLS negotiation with {server} failed: {error}"))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        FanoutError::connection(format!(
            "Connection to {server} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        FanoutError::connection(error.to_string())
    }
}

/// Formats a command error with PostgreSQL details if available.
fn format_command_error(error: sqlx::Error) -> FanoutError {
    let Some(db_error) = error.as_database_error() else {
        return FanoutError::command(error.to_string());
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        result.push_str(" (SQLSTATE ");
        result.push_str(pg_error.code());
        result.push(')');

        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }

        if let Some(routine) = pg_error.routine() {
            result.push_str("\n  ROUTINE: ");
            result.push_str(routine);
        }
    }

    FanoutError::command(result)
}
