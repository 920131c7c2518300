//! JSON export of a run's results.
//!
//! The document lists the successful targets' tables, labelled by position,
//! the failed targets with their error category, and optionally the run
//! parameters and the captured run log.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::config::{ConnectionSettings, OutputSettings, Parameters};
use crate::db::{ExecutionResult, Table};
use crate::error::{FanoutError, Result};
use crate::query::BatchOutcome;
use crate::target::Target;

/// Label of the diagnostic-message table.
const INFORMATION_MESSAGES_LABEL: &str = "Information messages";

/// Everything that goes into one exported document.
#[derive(Debug)]
pub struct Report<'a> {
    pub outcome: &'a BatchOutcome,
    /// Labels for each target's result sets, by position.
    pub labels: &'a [String],
    pub parameters: Option<Table>,
    pub logs: Option<Table>,
}

impl<'a> Report<'a> {
    /// A report of the results alone.
    pub fn new(outcome: &'a BatchOutcome) -> Self {
        Self {
            outcome,
            labels: &[],
            parameters: None,
            logs: None,
        }
    }
}

#[derive(Serialize)]
struct Document<'a> {
    targets: usize,
    succeeded: usize,
    failed: usize,
    results: Vec<ResultEntry<'a>>,
    failures: Vec<FailureEntry<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<&'a Table>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs: Option<&'a Table>,
}

#[derive(Serialize)]
struct ResultEntry<'a> {
    target: &'a Target,
    tables: Vec<TableEntry<'a>>,
}

#[derive(Serialize)]
struct TableEntry<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<&'a str>,
    #[serde(flatten)]
    table: &'a Table,
}

#[derive(Serialize)]
struct FailureEntry<'a> {
    target: &'a Target,
    category: &'static str,
    message: String,
}

impl<'a> Document<'a> {
    fn new(report: &'a Report<'a>) -> Self {
        let outcome = report.outcome;
        Self {
            targets: outcome.total(),
            succeeded: outcome.results.len(),
            failed: outcome.failures.len(),
            results: outcome
                .results
                .iter()
                .map(|result| ResultEntry::new(result, report.labels))
                .collect(),
            failures: outcome
                .failures
                .iter()
                .map(|failure| FailureEntry {
                    target: &failure.target,
                    category: failure.error.category(),
                    message: failure.error.to_string(),
                })
                .collect(),
            parameters: report.parameters.as_ref(),
            logs: report.logs.as_ref(),
        }
    }
}

impl<'a> ResultEntry<'a> {
    fn new(result: &'a ExecutionResult, labels: &'a [String]) -> Self {
        let tables = result
            .tables
            .iter()
            .enumerate()
            .map(|(index, table)| TableEntry {
                label: table_label(table, index, labels),
                table,
            })
            .collect();

        Self {
            target: &result.target,
            tables,
        }
    }
}

/// Synthetic tables are named by their id; result sets by their position.
fn table_label<'a>(table: &Table, index: usize, labels: &'a [String]) -> Option<&'a str> {
    if table.is_information_messages() {
        Some(INFORMATION_MESSAGES_LABEL)
    } else {
        labels.get(index).map(String::as_str)
    }
}

/// Writes the report as one JSON document.
pub fn write_json<W: Write>(writer: &mut W, report: &Report<'_>) -> Result<()> {
    let document = Document::new(report);

    serde_json::to_writer_pretty(&mut *writer, &document)
        .map_err(|e| FanoutError::output(format!("Failed to serialize results: {e}")))?;
    writeln!(writer).map_err(|e| FanoutError::output(format!("Failed to write results: {e}")))
}

/// Fails early when `path` exists and may not be replaced.
pub fn check_destination(path: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && path.as_os_str() != "-" && path.exists() {
        return Err(already_exists(path));
    }
    Ok(())
}

/// Writes the report to `path`, or to stdout when `path` is `-`.
///
/// An existing file is only replaced when `overwrite` is set.
pub fn write_json_to(path: &Path, report: &Report<'_>, overwrite: bool) -> Result<()> {
    if path.as_os_str() == "-" {
        let stdout = std::io::stdout();
        return write_json(&mut stdout.lock(), report);
    }

    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }

    let mut file = options.open(path).map_err(|e| match e.kind() {
        ErrorKind::AlreadyExists => already_exists(path),
        _ => FanoutError::output(format!("Failed to create {}: {e}", path.display())),
    })?;
    write_json(&mut file, report)
}

fn already_exists(path: &Path) -> FanoutError {
    FanoutError::output(format!(
        "{} already exists. Use --overwrite to replace it",
        path.display()
    ))
}

/// Builds the table of settings a run used. The password is never listed.
pub fn parameters_table(
    params: &Parameters,
    connection: &ConnectionSettings,
    output: &OutputSettings,
    targets: &[Target],
) -> Table {
    let targets = targets
        .iter()
        .map(Target::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    let entries = [
        ("Output", output.destination().display().to_string()),
        ("Overwrite", output.overwrite.to_string()),
        ("Targets", targets),
        ("Query", params.query.clone()),
        ("Backend", connection.backend.as_str().to_string()),
        ("User", connection.user.clone().unwrap_or_default()),
        ("ConnectTimeout", timeout_text(params.connect_timeout)),
        ("CommandTimeout", timeout_text(params.command_timeout)),
        ("Sequential", params.sequential.to_string()),
        ("Parallelism", params.parallelism.to_string()),
        ("DiscardResults", params.discard_results.to_string()),
        (
            "ShowInformationMessages",
            params.show_information_messages.to_string(),
        ),
        ("ShowParameters", output.show_parameters.to_string()),
        ("ShowLogs", output.show_logs.to_string()),
        ("Labels", output.labels.join(", ")),
    ];

    Table::parameters(
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect(),
    )
}

fn timeout_text(timeout: Option<Duration>) -> String {
    match timeout {
        Some(timeout) => format!("{}s", timeout.as_secs()),
        None => "none".to_string(),
    }
}
