//! Turns the result sets of one command into tables.

use std::time::Duration;

use tracing::{info, Instrument, Span};

use super::capture::MessageCapture;
use super::within;
use crate::config::Parameters;
use crate::db::{
    ExecutionResult, InfoMessage, ResultSink, Table, TableColumn, TableRow, TargetConnection,
};
use crate::error::{FanoutError, Result};
use crate::target::Target;

/// How result rows are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaterializeMode {
    /// Keep every row.
    #[default]
    Full,
    /// Count rows; each result set becomes a `FieldCount`/`RowCount` summary.
    Discard,
}

/// A [`ResultSink`] that builds one [`Table`] per result set.
#[derive(Debug)]
pub struct TableCollector {
    mode: MaterializeMode,
    tables: Vec<Table>,
    row_counts: Vec<usize>,
    columns: Option<Vec<TableColumn>>,
    rows: Vec<TableRow>,
    row_count: usize,
    capture: Option<MessageCapture>,
}

impl TableCollector {
    pub fn new(mode: MaterializeMode) -> Self {
        Self {
            mode,
            tables: Vec::new(),
            row_counts: Vec::new(),
            columns: None,
            rows: Vec::new(),
            row_count: 0,
            capture: None,
        }
    }

    /// Collects diagnostic messages into `capture` as well.
    pub fn with_capture(mut self, capture: MessageCapture) -> Self {
        self.capture = Some(capture);
        self
    }

    /// The span the command should run in, if messages are captured.
    pub fn capture_span(&self) -> Span {
        self.capture
            .as_ref()
            .map(MessageCapture::span)
            .unwrap_or_else(Span::none)
    }

    /// Row count of every completed result set, in order.
    pub fn row_counts(&self) -> &[usize] {
        &self.row_counts
    }

    /// Returns the collected tables, with the diagnostic table last if captured.
    pub fn into_tables(mut self) -> Vec<Table> {
        if self.columns.is_some() {
            self.end_result_set();
        }

        let mut tables = self.tables;
        if let Some(capture) = self.capture {
            tables.push(capture.finish());
        }
        tables
    }
}

impl ResultSink for TableCollector {
    fn start_result_set(&mut self, columns: Vec<TableColumn>) {
        if self.columns.is_some() {
            self.end_result_set();
        }
        self.columns = Some(columns);
        self.rows.clear();
        self.row_count = 0;
    }

    fn retains_values(&self) -> bool {
        self.mode == MaterializeMode::Full
    }

    fn push_row(&mut self, row: TableRow) {
        self.row_count += 1;
        if self.mode == MaterializeMode::Full {
            self.rows.push(row);
        }
    }

    fn skip_row(&mut self) {
        self.row_count += 1;
    }

    fn end_result_set(&mut self) {
        let Some(columns) = self.columns.take() else {
            return;
        };

        let table = match self.mode {
            MaterializeMode::Full => Table::new(columns, std::mem::take(&mut self.rows)),
            MaterializeMode::Discard => Table::result_summary(columns.len(), self.row_count),
        };
        self.tables.push(table);
        self.row_counts.push(self.row_count);
    }

    fn describe_result_set(&mut self, index: usize, columns: Vec<TableColumn>) {
        if self.row_counts.get(index) != Some(&0) {
            return;
        }
        let Some(table) = self.tables.get_mut(index) else {
            return;
        };

        *table = match self.mode {
            MaterializeMode::Full => Table::new(columns, Vec::new()),
            MaterializeMode::Discard => Table::result_summary(columns.len(), 0),
        };
    }

    fn info_message(&mut self, message: InfoMessage) {
        if let Some(capture) = &self.capture {
            capture.push(message);
        }
    }
}

/// Executes the configured command on one open connection.
#[derive(Debug, Clone, Copy)]
pub struct ResultMaterializer<'a> {
    params: &'a Parameters,
}

impl<'a> ResultMaterializer<'a> {
    pub fn new(params: &'a Parameters) -> Self {
        Self { params }
    }

    fn mode(&self) -> MaterializeMode {
        if self.params.discard_results {
            MaterializeMode::Discard
        } else {
            MaterializeMode::Full
        }
    }

    /// Runs the command and materializes every result set it returns.
    ///
    /// Tables keep the order in which the source produced them. When
    /// information messages are enabled, their table comes last.
    pub async fn execute(
        &self,
        conn: &mut dyn TargetConnection,
        target: &Target,
    ) -> Result<ExecutionResult> {
        let prefix = target.log_prefix();
        let mut collector = TableCollector::new(self.mode());
        if self.params.show_information_messages {
            collector = collector.with_capture(MessageCapture::install());
        }

        let span = collector.capture_span();
        let command = conn.execute(&self.params.query, &mut collector).instrument(span);
        let summary = match within(self.params.command_timeout, command).await {
            Some(summary) => summary?,
            None => return Err(command_timeout_error(self.params.command_timeout)),
        };

        let suffix = match self.mode() {
            MaterializeMode::Full => "",
            MaterializeMode::Discard => " (discarded)",
        };
        for (index, count) in collector.row_counts().iter().enumerate() {
            info!("{prefix} Rows in table {}: {count}{suffix}", index + 1);
        }
        if let Some(affected) = summary.rows_affected {
            info!("{prefix} Records affected: {affected}");
        }

        Ok(ExecutionResult::new(target.clone(), collector.into_tables()))
    }
}

fn command_timeout_error(deadline: Option<Duration>) -> FanoutError {
    let secs = deadline.map(|d| d.as_secs_f64()).unwrap_or_default();
    FanoutError::command(format!("Command timed out after {secs}s"))
}
