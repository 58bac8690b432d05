//! # semvec-storage
//!
//! Durable, content-addressed embedding store on RocksDB.
//!
//! The store is multi-reader/single-committer: reads never block on the
//! writer except for the instant of a commit's atomic swap, and all
//! mutations arrive through [`EmbeddingStore::apply`], one atomic
//! WriteBatch per call, driven by the write pipeline's single consumer.

pub mod column_families;
pub mod error;
pub mod keys;
pub mod store;

pub use column_families::{ALL_CF_NAMES, CF_DOCUMENTS, CF_EMBEDDINGS, CF_TRANSCRIPTS};
pub use error::StorageError;
pub use keys::EmbeddingKey;
pub use store::{EmbeddingStore, PutStatus, StorageOp, StoreStats};
