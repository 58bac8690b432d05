//! Index error types.

use thiserror::Error;

/// Errors that can occur during index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Underlying HNSW index error
    #[error("Index error: {0}")]
    Index(String),

    /// Vector length does not match the shard's dimension
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Storage scan failure during a build
    #[error("Storage error: {0}")]
    Storage(#[from] semvec_storage::StorageError),
}
