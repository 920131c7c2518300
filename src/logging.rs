//! Logging configuration for db-fanout.
//!
//! Installs a `tracing-subscriber` registry with independently filtered
//! layers: the formatted log output (stderr, or a file with `--log-file`),
//! filtered by `RUST_LOG`; the diagnostic message capture layer, which must
//! see driver notices whatever the log level is; and the [`LogTable`] that
//! keeps the run log for the exported document.

use std::fs::{self, File};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{Event, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::db::{SemanticType, Table, TableColumn, TableRow, Value};
use crate::error::{FanoutError, Result};
use crate::query::{MessageCaptureLayer, MessageVisitor};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes logging to stderr, or to `log_file` when given.
///
/// When `log_table` is given, `info` and more severe events are also kept
/// in it.
pub fn init_logging(log_file: Option<&Path>, log_table: Option<&LogTable>) -> Result<()> {
    let registry = tracing_subscriber::registry()
        .with(MessageCaptureLayer::filtered())
        .with(log_table.map(|table| table.clone().with_filter(LevelFilter::INFO)));

    let installed = match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            registry
                .with(
                    fmt::layer()
                        .with_writer(Mutex::new(file))
                        .with_ansi(false) // No ANSI colors in file output
                        .with_filter(env_filter()),
                )
                .try_init()
        }
        None => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(env_filter()),
            )
            .try_init(),
    };

    installed.map_err(|e| FanoutError::config(format!("Failed to initialize logging: {e}")))
}

/// Creates the log file, and its parent directory if needed.
///
/// The file is truncated on each run to avoid unbounded growth.
fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            FanoutError::config(format!("Could not create log directory: {e}"))
        })?;
    }

    File::create(path).map_err(|e| {
        FanoutError::config(format!(
            "Could not create log file {}: {e}",
            path.display()
        ))
    })
}

/// A layer that keeps every log event as a table row.
///
/// Clones share the same rows.
#[derive(Debug, Clone)]
pub struct LogTable {
    started: Instant,
    rows: Arc<Mutex<Vec<TableRow>>>,
}

impl LogTable {
    /// Column names of the log table.
    pub const COLUMNS: [&'static str; 4] = ["ElapsedMs", "Level", "Target", "Message"];

    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            rows: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the events recorded so far as a table.
    pub fn to_table(&self) -> Table {
        let columns = Self::COLUMNS
            .iter()
            .zip([
                SemanticType::Integer,
                SemanticType::Text,
                SemanticType::Text,
                SemanticType::Text,
            ])
            .map(|(name, data_type)| TableColumn::new(*name, data_type))
            .collect();
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Table::new(columns, rows).with_id(Table::LOGS_ID)
    }
}

impl Default for LogTable {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Subscriber> Layer<S> for LogTable {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        let elapsed = i64::try_from(self.started.elapsed().as_millis()).unwrap_or(i64::MAX);
        let row = vec![
            Value::Int(elapsed),
            Value::String(metadata.level().to_string()),
            Value::String(metadata.target().to_string()),
            Value::String(visitor.message),
        ];

        self.rows.lock().unwrap_or_else(|e| e.into_inner()).push(row);
    }
}
