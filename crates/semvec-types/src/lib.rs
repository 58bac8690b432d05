//! # semvec-types
//!
//! Shared data model and configuration for semvec: pooling methods,
//! embedding/document/transcript records, content hashing, and layered
//! settings. Leaf crate with no semvec dependencies.

pub mod config;
pub mod error;
pub mod hashing;
pub mod records;

pub use config::{InferenceSettings, RamDiskSettings, SearchSettings, Settings};
pub use error::TypesError;
pub use hashing::{bytes_hash, document_embedding_hash, normalize_text, text_hash, vector_hash};
pub use records::{
    DocumentRecord, EmbeddingRecord, PoolingMethod, SentenceEmbedding, TranscriptRecord,
};
