//! # semvec-service
//!
//! Facade over the semvec core: content-addressed embedding cache,
//! serialized write pipeline, bounded inference gate, HNSW index shards,
//! two-stage similarity search, and the RAM-backed model staging volume.
//!
//! The HTTP layer (or any other collaborator) talks to [`SemvecService`];
//! everything behind it is process-scoped state with explicit startup and
//! shutdown.

pub mod error;
pub mod service;

pub use error::ServiceError;
pub use service::{init_tracing, SemvecService, SimilarityReport};

// Re-exports collaborators need to call the service
pub use semvec_pipeline::WriteOutcome;
pub use semvec_ramdisk::{RamDiskSnapshot, RamDiskStatus};
pub use semvec_search::{MeasureScores, RefinedHit, SearchHit, SimilarityMeasure};
pub use semvec_types::{PoolingMethod, Settings, TranscriptRecord};
