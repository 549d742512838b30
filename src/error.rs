//! Error types for the gradebook project core
//!
//! This module provides structured error definitions using thiserror, with
//! anyhow accepted at the edges (listeners, CLI) and folded into `Other`.

use thiserror::Error;

/// Main error type for gradebook operations
#[derive(Error, Debug)]
pub enum GradebookError {
    /// Project id did not resolve
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Persistence backend failed to load or save
    #[error("Storage error: {0}")]
    Storage(String),

    /// Import file was unreadable or had the wrong shape
    #[error("Invalid import file: {0}")]
    InvalidImport(String),

    /// Invalid operation for the current manager state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for gradebook operations
pub type Result<T> = std::result::Result<T, GradebookError>;

/// Convert anyhow::Error to GradebookError
impl From<anyhow::Error> for GradebookError {
    fn from(err: anyhow::Error) -> Self {
        GradebookError::Other(err.to_string())
    }
}

impl From<toml::de::Error> for GradebookError {
    fn from(err: toml::de::Error) -> Self {
        GradebookError::Config(format!("Failed to parse config file: {}", err))
    }
}
