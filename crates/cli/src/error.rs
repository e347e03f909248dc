//! Error types for CLI operations.

use std::path::PathBuf;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration could not be loaded
    #[error("Failed to load configuration: {0}")]
    Config(#[from] contracts::ContractError),

    /// Coordination store could not be set up
    #[error("Coordination store unusable at {path}: {message}")]
    Store { path: PathBuf, message: String },

    /// Router failed to open
    #[error("Failed to open router: {0}")]
    RouterOpen(#[from] router::RouterError),

    /// Backend provisioner rejected the configuration
    #[error("Invalid backend configuration: {0}")]
    Backend(#[from] dispatcher::DispatcherError),

    /// Input stream could not be read
    #[error("Failed to read input {source_name}: {source}")]
    Input {
        source_name: String,
        #[source]
        source: std::io::Error,
    },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn store(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Store {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn input(source_name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Input {
            source_name: source_name.into(),
            source,
        }
    }
}
