//! Error types for db-fanout.
//!
//! Defines the main error enum used throughout the application.

use thiserror::Error;

/// Main error type for db-fanout operations.
#[derive(Error, Debug)]
pub enum FanoutError {
    /// Connection errors (host unreachable, auth failed, connect timeout, etc.)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command execution errors (syntax errors, server-side failures, command timeout, etc.)
    #[error("Command error: {0}")]
    Command(String),

    /// Anything else that ends a target's processing (panics, scheduler failures, etc.)
    #[error("Unexpected error: {0}")]
    Unexpected(String),

    /// Configuration errors (invalid config file, missing query, bad target, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors while writing the exported results.
    #[error("Output error: {0}")]
    Output(String),
}

impl FanoutError {
    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a command error with the given message.
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Creates an unexpected error with the given message.
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an output error with the given message.
    pub fn output(msg: impl Into<String>) -> Self {
        Self::Output(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "Connection Error",
            Self::Command(_) => "Command Error",
            Self::Unexpected(_) => "Unexpected Error",
            Self::Config(_) => "Configuration Error",
            Self::Output(_) => "Output Error",
        }
    }

    /// Returns true for the kinds that are isolated to a single target.
    pub fn is_target_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Command(_) | Self::Unexpected(_)
        )
    }
}

/// Result type alias using FanoutError.
pub type Result<T> = std::result::Result<T, FanoutError>;
