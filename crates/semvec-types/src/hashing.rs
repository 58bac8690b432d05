//! Content-addressed hashing.
//!
//! Every cache key is a SHA-256 digest of its own payload, so identical
//! inputs map to identical keys regardless of who produced them.

use sha2::{Digest, Sha256};

/// Normalize text before hashing: trim and collapse internal whitespace
/// runs to a single space. Two texts that differ only in whitespace layout
/// resolve to the same cache entry.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// SHA-256 hex digest of normalized text.
pub fn text_hash(text: &str) -> String {
    let normalized = normalize_text(text);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

/// SHA-256 hex digest over the little-endian byte image of a vector.
///
/// Used for integrity round-trips: the stored digest must match a digest
/// recomputed from the stored vector.
pub fn vector_hash(vector: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for value in vector {
        hasher.update(value.to_le_bytes());
    }
    hex::encode(hasher.finalize())
}

/// SHA-256 hex digest over raw bytes (documents, audio).
pub fn bytes_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Derived digest linking a document to one (model, pooling) embedding run.
pub fn document_embedding_hash(document_hash: &str, model_id: &str, pooling: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_hash.as_bytes());
    hasher.update(model_id.as_bytes());
    hasher.update(pooling.as_bytes());
    hex::encode(hasher.finalize())
}
