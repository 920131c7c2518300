//! Mock database driver for testing.
//!
//! Provides a scripted, in-memory connector so the dispatcher can be exercised
//! without any server: each target's server name selects a script describing
//! how connecting and executing behave.

use super::{
    BatchSummary, Connector, InfoMessage, ResultSink, SemanticType, TableColumn, TableRow,
    TargetConnection, Value,
};
use crate::error::{FanoutError, Result};
use crate::target::Target;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// One scripted result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockResultSet {
    pub columns: Vec<TableColumn>,
    pub rows: Vec<TableRow>,
}

impl MockResultSet {
    /// Creates a result set with the given columns and rows.
    pub fn new(columns: Vec<TableColumn>, rows: Vec<TableRow>) -> Self {
        Self { columns, rows }
    }

    /// A single-column, single-row result set.
    pub fn single_value(name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        let data_type = value.semantic_type();
        Self::new(vec![TableColumn::new(name, data_type)], vec![vec![value]])
    }

    /// A two-column result set with `count` rows numbered from 1.
    pub fn numbered(count: usize) -> Self {
        let columns = vec![
            TableColumn::new("id", SemanticType::Integer),
            TableColumn::new("label", SemanticType::Text),
        ];
        let rows = (1..=count)
            .map(|i| vec![Value::from(i), Value::String(format!("row {i}"))])
            .collect();
        Self::new(columns, rows)
    }
}

/// How a mock target behaves.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Fail the connection attempt with this message.
    pub connect_error: Option<String>,
    /// Time taken to connect.
    pub connect_delay: Duration,
    /// Result sets produced by every command.
    pub result_sets: Vec<MockResultSet>,
    /// Diagnostic messages emitted before the result sets.
    pub messages: Vec<InfoMessage>,
    /// Fail the command with this message, after emitting the messages.
    pub command_error: Option<String>,
    /// Time taken to execute the command.
    pub command_delay: Duration,
    /// Reported affected-row count.
    pub rows_affected: Option<u64>,
    /// Panic inside `execute`.
    pub panic_on_execute: bool,
}

impl MockScript {
    /// A script returning the given result sets.
    pub fn returning(result_sets: Vec<MockResultSet>) -> Self {
        Self {
            result_sets,
            ..Default::default()
        }
    }

    /// A script whose connection attempt fails.
    pub fn failing_connect(message: impl Into<String>) -> Self {
        Self {
            connect_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// A script whose command fails.
    pub fn failing_command(message: impl Into<String>) -> Self {
        Self {
            command_error: Some(message.into()),
            ..Default::default()
        }
    }

    /// A script whose command panics.
    pub fn panicking() -> Self {
        Self {
            panic_on_execute: true,
            ..Default::default()
        }
    }

    pub fn with_messages(mut self, messages: Vec<InfoMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_command_delay(mut self, delay: Duration) -> Self {
        self.command_delay = delay;
        self
    }

    pub fn with_rows_affected(mut self, rows: u64) -> Self {
        self.rows_affected = Some(rows);
        self
    }
}

/// A mock connector that replays scripts keyed by server name.
#[derive(Debug, Clone)]
pub struct MockConnector {
    scripts: HashMap<String, MockScript>,
    fallback: MockScript,
}

impl MockConnector {
    /// Creates a connector where every server returns one single-row result set.
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            fallback: MockScript::returning(vec![MockResultSet::single_value(
                "result", "mock",
            )]),
        }
    }

    /// Registers the script for a server.
    pub fn with_target(mut self, server: impl Into<String>, script: MockScript) -> Self {
        self.scripts.insert(server.into(), script);
        self
    }

    /// Replaces the script used for unregistered servers.
    pub fn with_fallback(mut self, script: MockScript) -> Self {
        self.fallback = script;
        self
    }

    fn script_for(&self, target: &Target) -> &MockScript {
        self.scripts.get(&target.server).unwrap_or(&self.fallback)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn TargetConnection>> {
        let script = self.script_for(target).clone();

        if !script.connect_delay.is_zero() {
            tokio::time::sleep(script.connect_delay).await;
        }

        if let Some(message) = &script.connect_error {
            return Err(FanoutError::connection(format!(
                "Cannot connect to {}: {message}",
                target.server
            )));
        }

        Ok(Box::new(MockConnection { script }))
    }
}

/// An open mock connection.
#[derive(Debug)]
pub struct MockConnection {
    script: MockScript,
}

#[async_trait]
impl TargetConnection for MockConnection {
    async fn execute(&mut self, _sql: &str, sink: &mut dyn ResultSink) -> Result<BatchSummary> {
        if !self.script.command_delay.is_zero() {
            tokio::time::sleep(self.script.command_delay).await;
        }

        if self.script.panic_on_execute {
            panic!("mock driver panicked during execute");
        }

        for message in &self.script.messages {
            sink.info_message(message.clone());
        }

        if let Some(message) = &self.script.command_error {
            return Err(FanoutError::command(message.clone()));
        }

        let retains_values = sink.retains_values();
        for result_set in &self.script.result_sets {
            sink.start_result_set(result_set.columns.clone());
            for row in &result_set.rows {
                if retains_values {
                    sink.push_row(row.clone());
                } else {
                    sink.skip_row();
                }
            }
            sink.end_result_set();
        }

        Ok(BatchSummary {
            rows_affected: self.script.rows_affected,
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
