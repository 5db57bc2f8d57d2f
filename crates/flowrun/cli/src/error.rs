//! CLI error types

use flowrun_types::WorkflowError;
use thiserror::Error;

/// CLI error types
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reported by the orchestrator
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for CliError {
    fn from(err: config::ConfigError) -> Self {
        CliError::Config(err.to_string())
    }
}

impl From<flowrun_storage::StorageError> for CliError {
    fn from(err: flowrun_storage::StorageError) -> Self {
        CliError::Workflow(err.into())
    }
}

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;
