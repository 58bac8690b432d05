//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Transient contention: the backend could not take the write right
    /// now. Retried by the write pipeline, never surfaced directly.
    #[error("Storage busy: {0}")]
    Busy(String),

    /// Column family missing from the opened database
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Record (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Malformed binary key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Non-transient RocksDB error
    #[error("Storage error: {0}")]
    Internal(String),
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind;
        match e.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain | ErrorKind::TimedOut => {
                StorageError::Busy(e.to_string())
            }
            _ => StorageError::Internal(e.to_string()),
        }
    }
}

impl StorageError {
    /// True for contention errors the pipeline should retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Busy(_))
    }
}
