//! Shared result-set iteration for the sqlx-backed drivers.
//!
//! sqlx reports a multi-statement batch as one stream of rows interleaved
//! with per-statement completions. This module turns that stream into
//! result-set boundaries on a [`ResultSink`], using sqlparser to tell
//! row-returning statements from commands when a statement yields no rows.
//! Such empty result sets are handed back so the driver can describe their
//! columns once the stream is done.

use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlparser::ast::Statement;
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;
use sqlx::Either;

use tracing::warn;

use crate::db::{BatchSummary, ResultSink, TableColumn, TableRow};
use crate::error::{FanoutError, Result};

/// Decodes a driver row into the tabular model.
pub(crate) trait DecodeRow {
    /// Column metadata of the result set this row belongs to.
    fn table_columns(&self) -> Vec<TableColumn>;

    /// Cell values, positionally aligned with `columns`.
    fn table_row(&self, columns: &[TableColumn]) -> TableRow;
}

/// Affected-row count of a completed statement.
pub(crate) trait AffectedRows {
    fn affected_rows(&self) -> u64;
}

impl AffectedRows for sqlx::postgres::PgQueryResult {
    fn affected_rows(&self) -> u64 {
        self.rows_affected()
    }
}

impl AffectedRows for sqlx::sqlite::SqliteQueryResult {
    fn affected_rows(&self) -> u64 {
        self.rows_affected()
    }
}

/// How one statement of a batch reports its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StatementKind {
    /// Returns rows. Carries the statement text, used to describe its columns.
    Rows(String),
    /// Reports an affected-row count.
    Command,
}

/// Classifies each statement of a batch.
///
/// Returns `None` when the batch cannot be parsed with the given dialect.
pub(crate) fn classify_batch(sql: &str, dialect: &dyn Dialect) -> Option<Vec<StatementKind>> {
    match Parser::parse_sql(dialect, sql) {
        Ok(statements) => Some(statements.iter().map(classify).collect()),
        Err(e) => {
            warn!("Could not classify statements ({e}); result sets without rows will be omitted");
            None
        }
    }
}

fn classify(statement: &Statement) -> StatementKind {
    match statement {
        Statement::Query(_) | Statement::Explain { .. } | Statement::ShowVariable { .. } => {
            StatementKind::Rows(statement.to_string())
        }
        _ => StatementKind::Command,
    }
}

/// A row-returning statement that produced no rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EmptyResultSet {
    /// Position of the result set within the batch.
    pub index: usize,
    /// Statement text to describe.
    pub sql: String,
}

/// What draining a batch left for the driver to finish.
#[derive(Debug, Default)]
pub(crate) struct DrainedBatch {
    pub summary: BatchSummary,
    pub undescribed: Vec<EmptyResultSet>,
}

/// Drains a `fetch_many` stream into `sink`.
///
/// A result set opens on the first row after a statement boundary and closes
/// at the statement's completion. A row-returning statement that produced no
/// rows still yields an empty result set when `plan` says so, and is listed
/// in [`DrainedBatch::undescribed`]; other completions contribute to the
/// affected-row count.
pub(crate) async fn drain_batch<'a, Q, R>(
    mut stream: BoxStream<'a, std::result::Result<Either<Q, R>, sqlx::Error>>,
    plan: Option<&[StatementKind]>,
    sink: &mut dyn ResultSink,
    map_err: fn(sqlx::Error) -> FanoutError,
) -> Result<DrainedBatch>
where
    Q: AffectedRows,
    R: DecodeRow,
{
    let retains_values = sink.retains_values();
    let mut statement = 0usize;
    let mut result_sets = 0usize;
    let mut open: Option<Vec<TableColumn>> = None;
    let mut drained = DrainedBatch::default();

    while let Some(item) = stream.try_next().await.map_err(map_err)? {
        match item {
            Either::Right(row) => {
                if open.is_none() {
                    let columns = row.table_columns();
                    sink.start_result_set(columns.clone());
                    open = Some(columns);
                }

                if retains_values {
                    let columns = open.as_deref().unwrap_or_default();
                    sink.push_row(row.table_row(columns));
                } else {
                    sink.skip_row();
                }
            }
            Either::Left(done) => {
                let kind = plan.and_then(|kinds| kinds.get(statement));

                if open.take().is_some() {
                    sink.end_result_set();
                    result_sets += 1;
                } else if let Some(StatementKind::Rows(sql)) = kind {
                    sink.start_result_set(Vec::new());
                    sink.end_result_set();
                    drained.undescribed.push(EmptyResultSet {
                        index: result_sets,
                        sql: sql.clone(),
                    });
                    result_sets += 1;
                } else {
                    let affected = drained.summary.rows_affected.unwrap_or(0);
                    drained.summary.rows_affected = Some(affected + done.affected_rows());
                }

                statement += 1;
            }
        }
    }

    if open.take().is_some() {
        sink.end_result_set();
    }

    Ok(drained)
}

/// Formats a sqlx error raised while a command runs.
pub(crate) fn command_error(error: sqlx::Error) -> FanoutError {
    match error.as_database_error() {
        Some(db_error) => match db_error.code() {
            Some(code) => FanoutError::command(format!("ERROR {code}: {}", db_error.message())),
            None => FanoutError::command(format!("ERROR: {}", db_error.message())),
        },
        None => FanoutError::command(error.to_string()),
    }
}
