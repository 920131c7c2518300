//! Configuration management for db-fanout.
//!
//! Handles loading configuration from TOML files and environment variables:
//! run settings, connection credentials shared by every target, export
//! settings, and an optional inline target list.

use crate::db::DatabaseBackend;
use crate::error::{FanoutError, Result};
use crate::target::Target;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for db-fanout.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// How the command is run.
    #[serde(default)]
    pub run: RunSettings,

    /// Connection settings applied to every target.
    #[serde(default)]
    pub connection: ConnectionSettings,

    /// What the exported document contains and where it goes.
    #[serde(default)]
    pub output: OutputSettings,

    /// Inline target list.
    #[serde(default)]
    pub targets: Vec<Target>,
}

/// Run settings, overridable from the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Command text sent to every target.
    pub query: Option<String>,

    /// File holding the command text, used when `query` is unset.
    pub query_file: Option<PathBuf>,

    /// Connection deadline in seconds; 0 disables it.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Command deadline in seconds; 0 disables it.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Process targets one at a time, in order.
    #[serde(default)]
    pub sequential: bool,

    /// Maximum number of targets worked on at once.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Count rows without keeping their values.
    #[serde(default)]
    pub discard_results: bool,

    /// Append the diagnostic message table to each target's results.
    #[serde(default)]
    pub show_information_messages: bool,
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_command_timeout() -> u64 {
    30
}

fn default_parallelism() -> usize {
    4
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            query: None,
            query_file: None,
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
            sequential: false,
            parallelism: default_parallelism(),
            discard_results: false,
            show_information_messages: false,
        }
    }
}

impl RunSettings {
    /// Resolves the command text and validates the settings.
    pub fn to_parameters(&self) -> Result<Parameters> {
        let query = match (&self.query, &self.query_file) {
            (Some(query), _) => query.clone(),
            (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
                FanoutError::config(format!(
                    "Failed to read query file {}: {e}",
                    path.display()
                ))
            })?,
            (None, None) => String::new(),
        };

        if query.trim().is_empty() {
            return Err(FanoutError::config(
                "No query given. Use --query, --query-file or [run].query",
            ));
        }

        if self.parallelism == 0 {
            return Err(FanoutError::config("parallelism must be at least 1"));
        }

        Ok(Parameters {
            query,
            connect_timeout: timeout_from_secs(self.connect_timeout_secs),
            command_timeout: timeout_from_secs(self.command_timeout_secs),
            sequential: self.sequential,
            parallelism: self.parallelism,
            discard_results: self.discard_results,
            show_information_messages: self.show_information_messages,
        })
    }
}

/// Converts a configured timeout, where 0 means no deadline.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Read-only settings of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub query: String,
    pub connect_timeout: Option<Duration>,
    pub command_timeout: Option<Duration>,
    pub sequential: bool,
    pub parallelism: usize,
    pub discard_results: bool,
    pub show_information_messages: bool,
}

impl Parameters {
    /// Parameters for `query` with default run settings.
    pub fn new(query: impl Into<String>) -> Self {
        let defaults = RunSettings::default();
        Self {
            query: query.into(),
            connect_timeout: timeout_from_secs(defaults.connect_timeout_secs),
            command_timeout: timeout_from_secs(defaults.command_timeout_secs),
            sequential: defaults.sequential,
            parallelism: defaults.parallelism,
            discard_results: defaults.discard_results,
            show_information_messages: defaults.show_information_messages,
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Destination file; stdout when unset or `-`.
    pub path: Option<PathBuf>,

    /// Replace an existing destination file.
    #[serde(default)]
    pub overwrite: bool,

    /// Labels for each target's result sets, by position.
    #[serde(default)]
    pub labels: Vec<String>,

    /// Include the run-parameters table.
    #[serde(default)]
    pub show_parameters: bool,

    /// Include the captured run log.
    #[serde(default)]
    pub show_logs: bool,
}

impl OutputSettings {
    /// The destination, `-` meaning stdout.
    pub fn destination(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| PathBuf::from("-"))
    }
}

/// Connection settings shared by every target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Database backend.
    #[serde(default)]
    pub backend: DatabaseBackend,

    /// Database user.
    pub user: Option<String>,

    /// Database password (not recommended to store in config).
    pub password: Option<String>,

    /// Port used when a target's server has none.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application name reported to the server.
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

fn default_port() -> u16 {
    5432
}

fn default_application_name() -> String {
    "db-fanout".to_string()
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            user: None,
            password: None,
            port: default_port(),
            application_name: default_application_name(),
        }
    }
}

impl ConnectionSettings {
    /// Applies environment variables (PGUSER, PGPASSWORD) as defaults.
    pub fn apply_env_defaults(&mut self) {
        if self.user.is_none() {
            self.user = std::env::var("PGUSER").ok();
        }
        if self.password.is_none() {
            self.password = std::env::var("PGPASSWORD").ok();
        }
    }

    /// Returns a display-safe string (no password) for log lines.
    pub fn display_string(&self) -> String {
        let user = self.user.as_deref().unwrap_or("(default user)");
        format!("{} as {user}", self.backend.as_str())
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("db-fanout")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields the default configuration.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| FanoutError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            FanoutError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }
}
