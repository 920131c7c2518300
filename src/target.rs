//! Query targets.
//!
//! A target is one addressable data source: a server and a database on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::error::{FanoutError, Result};

/// One data source to query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    /// Server identifier (`host` or `host:port` for PostgreSQL, a label for SQLite).
    pub server: String,

    /// Database name (a file path for SQLite).
    pub database: String,
}

impl Target {
    /// Creates a new target.
    pub fn new(server: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            database: database.into(),
        }
    }

    /// Parses a `server/database` pair, splitting at the first `/`.
    pub fn parse(input: &str) -> Result<Self> {
        let (server, database) = input.split_once('/').ok_or_else(|| {
            FanoutError::config(format!(
                "Invalid target '{input}'. Expected SERVER/DATABASE"
            ))
        })?;

        if server.trim().is_empty() || database.trim().is_empty() {
            return Err(FanoutError::config(format!(
                "Invalid target '{input}'. Server and database must not be empty"
            )));
        }

        Ok(Self::new(server.trim(), database.trim()))
    }

    /// Prefix used on every log line concerning this target.
    pub fn log_prefix(&self) -> String {
        format!("[{}][{}]", self.server, self.database)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.database)
    }
}

/// A list of targets as stored in a targets file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetList {
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl TargetList {
    /// Loads a target list from a TOML file of `[[targets]]` tables.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            FanoutError::config(format!(
                "Failed to read targets file {}: {e}",
                path.display()
            ))
        })?;

        toml::from_str(&content).map_err(|e| {
            FanoutError::config(format!(
                "Targets file error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }
}
