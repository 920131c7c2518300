//! Tabular result types for db-fanout.
//!
//! Defines the structures used to represent the result sets returned by every
//! target: typed columns, positional rows, tables and per-target results.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::target::Target;

/// Semantic type of a column, derived once from driver-reported metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticType {
    Boolean,
    Integer,
    Float,
    Text,
    DateTime,
    Binary,
    Null,
    #[default]
    Other,
}

impl SemanticType {
    /// Maps a PostgreSQL or SQLite type name to its semantic type.
    ///
    /// Matching is case-insensitive and ignores length/precision suffixes
    /// such as `VARCHAR(255)` or `NUMERIC(10, 2)`.
    pub fn from_type_name(name: &str) -> Self {
        let upper = name.trim().to_uppercase();
        let base = upper.split('(').next().unwrap_or_default().trim();

        match base {
            "BOOL" | "BOOLEAN" | "BIT" => Self::Boolean,

            "INT2" | "INT4" | "INT8" | "SMALLINT" | "INT" | "INTEGER" | "BIGINT" | "TINYINT"
            | "MEDIUMINT" | "OID" => Self::Integer,

            "FLOAT4" | "FLOAT8" | "REAL" | "DOUBLE" | "DOUBLE PRECISION" | "FLOAT" | "NUMERIC"
            | "DECIMAL" | "MONEY" => Self::Float,

            "TEXT" | "VARCHAR" | "CHARACTER VARYING" | "CHAR" | "CHARACTER" | "BPCHAR" | "NAME"
            | "CITEXT" | "UUID" | "JSON" | "JSONB" | "XML" | "CLOB" => Self::Text,

            "TIMESTAMP" | "TIMESTAMPTZ" | "DATE" | "TIME" | "TIMETZ" | "DATETIME" => Self::DateTime,

            "BYTEA" | "BLOB" => Self::Binary,

            "NULL" | "VOID" => Self::Null,

            _ => Self::Other,
        }
    }

    /// Returns the type as a lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Text => "text",
            Self::DateTime => "datetime",
            Self::Binary => "binary",
            Self::Null => "null",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Represents a single cell value.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub enum Value {
    /// NULL value.
    #[default]
    Null,

    /// Boolean value.
    Bool(bool),

    /// Signed integer (up to i64).
    Int(i64),

    /// Floating point number.
    Float(f64),

    /// Text/string value.
    String(String),

    /// Date, time or timestamp, in the driver's textual rendering.
    DateTime(String),

    /// Binary data.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns true if this value is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Semantic type this value carries, `Null` for NULL.
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            Value::Null => SemanticType::Null,
            Value::Bool(_) => SemanticType::Boolean,
            Value::Int(_) => SemanticType::Integer,
            Value::Float(_) => SemanticType::Float,
            Value::String(_) => SemanticType::Text,
            Value::DateTime(_) => SemanticType::DateTime,
            Value::Bytes(_) => SemanticType::Binary,
        }
    }

    /// Whether this value may sit in a column of `data_type`.
    ///
    /// NULL fits every column and an `Other` column holds any value.
    pub fn fits(&self, data_type: SemanticType) -> bool {
        self.is_null() || data_type == SemanticType::Other || self.semantic_type() == data_type
    }

    /// Converts a text-protocol cell into a value of the column's semantic type.
    ///
    /// Text that does not parse as the declared type is kept as a string.
    pub fn from_text(data_type: SemanticType, text: String) -> Self {
        match data_type {
            SemanticType::Boolean => match text.as_str() {
                "t" | "true" | "TRUE" | "1" => Value::Bool(true),
                "f" | "false" | "FALSE" | "0" => Value::Bool(false),
                _ => Value::String(text),
            },
            SemanticType::Integer => text
                .parse::<i64>()
                .map(Value::Int)
                .unwrap_or(Value::String(text)),
            SemanticType::Float => text
                .parse::<f64>()
                .map(Value::Float)
                .unwrap_or(Value::String(text)),
            SemanticType::DateTime => Value::DateTime(text),
            SemanticType::Binary => Value::Bytes(text.into_bytes()),
            SemanticType::Null => Value::Null,
            SemanticType::Text | SemanticType::Other => Value::String(text),
        }
    }

    /// Attempts to convert the value to a string representation.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) | Value::DateTime(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

// Conversion implementations for common types
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T> From<Option<T>> for Value
where
    T: Into<Value>,
{
    fn from(v: Option<T>) -> Self {
        match v {
            Some(val) => val.into(),
            None => Value::Null,
        }
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    /// Column name. Not required to be unique within a table.
    pub name: String,

    /// Semantic type of the column's values.
    pub data_type: SemanticType,
}

impl TableColumn {
    /// Creates a new column with the given name and type.
    pub fn new(name: impl Into<String>, data_type: SemanticType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    /// Creates a column whose type is derived from a driver type name.
    pub fn from_type_name(name: impl Into<String>, type_name: &str) -> Self {
        Self::new(name, SemanticType::from_type_name(type_name))
    }
}

/// A row of cell values, positionally aligned with the table's columns.
pub type TableRow = Vec<Value>;

/// One result set: ordered columns and ordered rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,

    /// Unset for query result sets; set for synthetic tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Table {
    /// Reserved id of the synthetic diagnostic-message table.
    pub const INFORMATION_MESSAGES_ID: &'static str = "info-messages";

    /// Column names of the diagnostic-message table.
    pub const INFORMATION_MESSAGE_COLUMNS: [&'static str; 6] =
        ["Class", "Number", "State", "Procedure", "LineNumber", "Message"];

    /// Reserved id of the run-parameters table.
    pub const PARAMETERS_ID: &'static str = "command-line-parameters";

    /// Reserved id of the captured run-log table.
    pub const LOGS_ID: &'static str = "logs";

    /// Creates a table for a query result set.
    ///
    /// Column types are settled against the rows, see
    /// [`Table::settle_column_types`].
    pub fn new(columns: Vec<TableColumn>, rows: Vec<TableRow>) -> Self {
        debug_assert!(rows.iter().all(|row| row.len() == columns.len()));
        let mut table = Self {
            columns,
            rows,
            id: None,
        };
        table.settle_column_types();
        table
    }

    /// Widens column types until every cell fits its column.
    ///
    /// A column whose non-null cells disagree with its type takes the one
    /// type those cells share, or `Other` when they are mixed.
    pub fn settle_column_types(&mut self) {
        for (index, column) in self.columns.iter_mut().enumerate() {
            let cells = self
                .rows
                .iter()
                .filter_map(|row| row.get(index))
                .filter(|value| !value.is_null());

            if cells.clone().all(|value| value.fits(column.data_type)) {
                continue;
            }

            let mut kinds = cells.map(Value::semantic_type);
            column.data_type = match kinds.next() {
                Some(first) if kinds.all(|kind| kind == first) => first,
                _ => SemanticType::Other,
            };
        }
    }

    /// Sets the table id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Builds the single-row summary that replaces a result set in discard mode.
    pub fn result_summary(field_count: usize, row_count: usize) -> Self {
        let columns = vec![
            TableColumn::new("FieldCount", SemanticType::Integer),
            TableColumn::new("RowCount", SemanticType::Integer),
        ];
        let rows = vec![vec![Value::from(field_count), Value::from(row_count)]];
        Self::new(columns, rows)
    }

    /// Builds the synthetic table holding captured diagnostic messages.
    pub fn information_messages(messages: Vec<InfoMessage>) -> Self {
        let columns = Self::INFORMATION_MESSAGE_COLUMNS
            .iter()
            .map(|name| TableColumn::new(*name, SemanticType::Text))
            .collect();
        let rows = messages.into_iter().map(InfoMessage::into_row).collect();
        Self::new(columns, rows).with_id(Self::INFORMATION_MESSAGES_ID)
    }

    /// Builds the two-column `Parameter`/`Value` table describing a run.
    pub fn parameters(entries: Vec<(String, String)>) -> Self {
        let columns = vec![
            TableColumn::new("Parameter", SemanticType::Text),
            TableColumn::new("Value", SemanticType::Text),
        ];
        let rows = entries
            .into_iter()
            .map(|(name, value)| vec![Value::String(name), Value::String(value)])
            .collect();
        Self::new(columns, rows).with_id(Self::PARAMETERS_ID)
    }

    /// Number of columns.
    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if this is the synthetic diagnostic-message table.
    pub fn is_information_messages(&self) -> bool {
        self.id.as_deref() == Some(Self::INFORMATION_MESSAGES_ID)
    }

    /// Returns true if every row has exactly one cell per column and every
    /// cell fits its column's type.
    pub fn is_consistent(&self) -> bool {
        let width = self.columns.len();
        self.rows.iter().all(|row| {
            row.len() == width
                && row
                    .iter()
                    .zip(&self.columns)
                    .all(|(value, column)| value.fits(column.data_type))
        })
    }
}

/// A diagnostic message emitted by a source while a command executes.
///
/// All fields are textual; drivers leave the ones they cannot report empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoMessage {
    pub class: String,
    pub number: String,
    pub state: String,
    pub procedure: String,
    pub line_number: String,
    pub message: String,
}

impl InfoMessage {
    /// Creates a message with only its class and text set.
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Converts the message into a diagnostic-table row.
    pub fn into_row(self) -> TableRow {
        vec![
            Value::String(self.class),
            Value::String(self.number),
            Value::String(self.state),
            Value::String(self.procedure),
            Value::String(self.line_number),
            Value::String(self.message),
        ]
    }
}

/// All tables produced by one target that completed without failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub target: Target,
    pub tables: Vec<Table>,
}

impl ExecutionResult {
    /// Creates a new execution result.
    pub fn new(target: Target, tables: Vec<Table>) -> Self {
        Self { target, tables }
    }

    /// Returns the diagnostic-message table, if one was captured.
    pub fn information_messages(&self) -> Option<&Table> {
        self.tables
            .last()
            .filter(|table| table.is_information_messages())
    }
}
