//! RAM disk error types.

use thiserror::Error;

/// Errors that can occur managing the RAM-backed volume.
///
/// Mount-time permission and capacity shortfalls are NOT errors: they
/// downgrade to `MountFailed` status and the system continues on ordinary
/// storage. These variants cover genuine failures in explicit operations.
#[derive(Debug, Error)]
pub enum RamDiskError {
    /// Operation requires a mounted volume
    #[error("RAM disk unavailable: {0}")]
    Unavailable(String),

    /// Mount/unmount subprocess failure
    #[error("Mount command failed: {0}")]
    Command(String),

    /// Copy-then-verify detected a mismatch; the volume was rolled back
    #[error("Model staging failed: {0}")]
    StagingFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
