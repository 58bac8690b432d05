//! Search error types.

use thiserror::Error;

/// Errors that can occur during similarity search.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Coarse index failure
    #[error("Index error: {0}")]
    Index(#[from] semvec_index::IndexError),

    /// Candidate vector fetch failure
    #[error("Storage error: {0}")]
    Storage(#[from] semvec_storage::StorageError),

    /// Invalid query parameters or vectors
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
