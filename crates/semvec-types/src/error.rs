//! Shared error types.

use thiserror::Error;

/// Errors from the shared data model and configuration layer.
#[derive(Debug, Error)]
pub enum TypesError {
    /// Configuration loading or validation error
    #[error("Config error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
