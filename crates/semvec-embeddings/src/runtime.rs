//! Inference runtime trait and types.
//!
//! The model itself is an opaque function from text to a token-level
//! embedding matrix; pooling happens outside the runtime so every cached
//! vector is reproducible from the same matrix.

use semvec_types::PoolingMethod;

use crate::error::EmbeddingError;
use crate::pooling::pool;

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Model name (e.g., "all-MiniLM-L6-v2")
    pub name: String,
    /// Token embedding dimension
    pub dimension: usize,
    /// Maximum sequence length in tokens
    pub max_sequence_length: usize,
}

/// Trait for inference runtimes.
///
/// Implementations must be thread-safe (Send + Sync) for concurrent use;
/// concurrency is bounded by the [`crate::InferenceGate`], not by the
/// runtime.
pub trait InferenceRuntime: Send + Sync {
    /// Get model information
    fn info(&self) -> &ModelInfo;

    /// Produce the raw token-level embedding matrix (tokens x dimension)
    /// for a single text.
    fn embed_tokens(&self, text: &str) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed and pool in one call.
    fn embed_pooled(
        &self,
        text: &str,
        method: PoolingMethod,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let matrix = self.embed_tokens(text)?;
        pool(&matrix, method)
    }
}
