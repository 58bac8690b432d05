//! Column family definitions for the embedding store.

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Pooled text embeddings, keyed by (model, pooling, corpus, text_hash)
pub const CF_EMBEDDINGS: &str = "embeddings";

/// Documents and their compressed per-sentence results, keyed by
/// document_embedding_hash
pub const CF_DOCUMENTS: &str = "documents";

/// Audio transcripts, keyed by audio_hash
pub const CF_TRANSCRIPTS: &str = "transcripts";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_EMBEDDINGS, CF_DOCUMENTS, CF_TRANSCRIPTS];

/// Build descriptors for all column families.
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    ALL_CF_NAMES
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
        .collect()
}
