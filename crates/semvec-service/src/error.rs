//! Service error types.

use thiserror::Error;

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Model runtime or pooling failure (propagated, not retried)
    #[error("Embedding error: {0}")]
    Embedding(#[from] semvec_embeddings::EmbeddingError),

    /// Storage read failure
    #[error("Storage error: {0}")]
    Storage(#[from] semvec_storage::StorageError),

    /// Pipeline interaction failure
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] semvec_pipeline::PipelineError),

    /// Index build/lookup failure
    #[error("Index error: {0}")]
    Index(#[from] semvec_index::IndexError),

    /// Search failure
    #[error("Search error: {0}")]
    Search(#[from] semvec_search::SearchError),

    /// Explicit RAM disk operation failure
    #[error("RAM disk error: {0}")]
    RamDisk(#[from] semvec_ramdisk::RamDiskError),

    /// Configuration or record error
    #[error("{0}")]
    Types(#[from] semvec_types::TypesError),

    /// A write's retries were exhausted. Reported once per task, with the
    /// dedup key, so the caller can decide whether to resubmit.
    #[error("Write failed for {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    /// Requested model is not the one this process serves
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}
