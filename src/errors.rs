//! Error types for the execution engine

use std::time::Duration;
use thiserror::Error;

/// A script could not be evaluated to completion
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// Syntax error or uncaught throw
    #[error("{0}")]
    Thrown(String),

    #[error("Script timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Script set an invalid request method: {0}")]
    InvalidMethod(String),

    #[error("Script runtime setup failed: {0}")]
    Setup(String),
}

/// A transport could not complete the exchange
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request timed out ({}s)", .0.as_secs())]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("curl failed: {0}")]
    Process(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Execution-level failure reported to the caller
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Pre-request script failed: {0}")]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Script(_) => "script",
            ExecutionError::Transport(_) => "transport",
        }
    }
}

/// Configuration could not be loaded
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
}
