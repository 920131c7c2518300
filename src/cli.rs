//! Command-line argument parsing for db-fanout.
//!
//! Every run setting can come from the config file; flags given here take
//! precedence over it.

use crate::config::Config;
use crate::db::DatabaseBackend;
use crate::error::{FanoutError, Result};
use crate::target::Target;
use clap::Parser;
use std::path::PathBuf;

/// Run one SQL command against many databases at once.
#[derive(Parser, Debug)]
#[command(name = "fanout")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// SQL command to run on every target
    #[arg(short = 'q', long, value_name = "SQL", conflicts_with = "query_file")]
    pub query: Option<String>,

    /// File containing the SQL command
    #[arg(short = 'f', long, value_name = "PATH")]
    pub query_file: Option<PathBuf>,

    /// Target as SERVER/DATABASE (repeatable)
    #[arg(short = 't', long = "target", value_name = "SERVER/DATABASE")]
    pub targets: Vec<String>,

    /// TOML file with [[targets]] entries
    #[arg(short = 'T', long, value_name = "PATH")]
    pub targets_file: Option<PathBuf>,

    /// Config file path
    #[arg(long, value_name = "PATH", env = "FANOUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database backend: postgres or sqlite
    #[arg(short = 'b', long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Database user
    #[arg(short = 'U', long, value_name = "USER")]
    pub user: Option<String>,

    /// Default port for servers given without one
    #[arg(short = 'p', long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Connection timeout in seconds (0 = none)
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Command timeout in seconds (0 = none)
    #[arg(long, value_name = "SECS")]
    pub command_timeout: Option<u64>,

    /// Maximum number of targets queried at once
    #[arg(short = 'j', long, value_name = "N")]
    pub parallelism: Option<usize>,

    /// Query targets one at a time, in order
    #[arg(long)]
    pub sequential: bool,

    /// Count rows instead of keeping them
    #[arg(long)]
    pub discard_results: bool,

    /// Include the server's informational messages as an extra table
    #[arg(long)]
    pub show_messages: bool,

    /// Write results as JSON to a file ("-" for stdout, the default)
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Replace the output file if it exists
    #[arg(long)]
    pub overwrite: bool,

    /// Label for each result set, by position (repeatable or comma-separated)
    #[arg(short = 'l', long = "label", value_name = "LABEL", value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Include the run parameters in the output
    #[arg(long)]
    pub show_parameters: bool,

    /// Include the run log in the output
    #[arg(long)]
    pub show_logs: bool,

    /// Write logs to a file instead of stderr
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Use mock database (in-memory, for testing)
    #[arg(long)]
    pub mock_db: bool,

    /// Do not print progress lines
    #[arg(long)]
    pub quiet: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Applies flags on top of a loaded configuration.
    pub fn apply_to(&self, config: &mut Config) -> Result<()> {
        let run = &mut config.run;
        if let Some(query) = &self.query {
            run.query = Some(query.clone());
            run.query_file = None;
        } else if let Some(path) = &self.query_file {
            run.query = None;
            run.query_file = Some(path.clone());
        }
        if let Some(secs) = self.connect_timeout {
            run.connect_timeout_secs = secs;
        }
        if let Some(secs) = self.command_timeout {
            run.command_timeout_secs = secs;
        }
        if let Some(parallelism) = self.parallelism {
            run.parallelism = parallelism;
        }
        run.sequential |= self.sequential;
        run.discard_results |= self.discard_results;
        run.show_information_messages |= self.show_messages;

        let connection = &mut config.connection;
        if let Some(backend) = &self.backend {
            connection.backend = DatabaseBackend::parse(backend).ok_or_else(|| {
                FanoutError::config(format!(
                    "Unknown backend '{backend}'. Expected postgres or sqlite"
                ))
            })?;
        }
        if let Some(user) = &self.user {
            connection.user = Some(user.clone());
        }
        if let Some(port) = self.port {
            connection.port = port;
        }

        let output = &mut config.output;
        if let Some(path) = &self.output {
            output.path = Some(path.clone());
        }
        if !self.labels.is_empty() {
            output.labels = self.labels.clone();
        }
        output.overwrite |= self.overwrite;
        output.show_parameters |= self.show_parameters;
        output.show_logs |= self.show_logs;

        Ok(())
    }

    /// Parses the targets given with --target.
    pub fn parse_targets(&self) -> Result<Vec<Target>> {
        self.targets.iter().map(|input| Target::parse(input)).collect()
    }
}
