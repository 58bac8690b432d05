//! Core records: embeddings, documents, transcripts.
//!
//! Records serialize to JSON bytes for storage values. Identity tuples are
//! content-addressed (see [`crate::hashing`]); the storage layer owns the
//! binary key encodings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypesError;
use crate::hashing::{text_hash, vector_hash};

/// Deterministic reduction from a (tokens x dim) matrix to one fixed-length
/// vector. The output length depends only on the model dimension and the
/// method, so every (model, pooling) pair has a stable vector length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingMethod {
    Mean,
    MinsMaxes,
    Svd,
    SvdFirstFour,
    Ica,
    FactorAnalysis,
    GaussianRandomProjection,
}

impl PoolingMethod {
    /// All methods, in a stable order.
    pub const ALL: &'static [PoolingMethod] = &[
        PoolingMethod::Mean,
        PoolingMethod::MinsMaxes,
        PoolingMethod::Svd,
        PoolingMethod::SvdFirstFour,
        PoolingMethod::Ica,
        PoolingMethod::FactorAnalysis,
        PoolingMethod::GaussianRandomProjection,
    ];

    /// Stable snake_case name used in keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolingMethod::Mean => "mean",
            PoolingMethod::MinsMaxes => "mins_maxes",
            PoolingMethod::Svd => "svd",
            PoolingMethod::SvdFirstFour => "svd_first_four",
            PoolingMethod::Ica => "ica",
            PoolingMethod::FactorAnalysis => "factor_analysis",
            PoolingMethod::GaussianRandomProjection => "gaussian_random_projection",
        }
    }

    /// Parse from the snake_case name.
    pub fn parse(name: &str) -> Result<Self, TypesError> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == name)
            .ok_or_else(|| TypesError::InvalidInput(format!("Unknown pooling method: {}", name)))
    }

    /// Pooled vector length for a model with the given token dimension.
    pub fn output_dim(&self, model_dim: usize) -> usize {
        match self {
            PoolingMethod::Mean => model_dim,
            PoolingMethod::MinsMaxes => 2 * model_dim,
            PoolingMethod::Svd => 2 * model_dim,
            PoolingMethod::SvdFirstFour => 4 * model_dim,
            PoolingMethod::Ica => 2 * model_dim,
            PoolingMethod::FactorAnalysis => 2 * model_dim,
            PoolingMethod::GaussianRandomProjection => 2 * model_dim,
        }
    }
}

impl std::fmt::Display for PoolingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A cached embedding, keyed by (text_hash, model_id, pooling, corpus_id).
///
/// The write that collides with an existing non-stale row is a cache hit,
/// not an overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// SHA-256 of the normalized source text
    pub text_hash: String,
    /// Model identifier
    pub model_id: String,
    /// Pooling method used to reduce the token matrix
    pub pooling_method: PoolingMethod,
    /// Optional grouping label ("" = default corpus)
    #[serde(default)]
    pub corpus_id: String,
    /// The pooled vector
    pub vector: Vec<f32>,
    /// SHA-256 over the vector's little-endian byte image
    pub embedding_hash: String,
    /// When the producing request arrived
    pub request_time: DateTime<Utc>,
    /// When the vector was computed
    pub response_time: DateTime<Utc>,
    /// Weak back-reference to an owning document, if any
    #[serde(default)]
    pub source_document_hash: Option<String>,
    /// A stale row is replaced by the next colliding write
    #[serde(default)]
    pub stale: bool,
}

impl EmbeddingRecord {
    /// Build a record for freshly computed text, filling in both digests.
    pub fn new(
        text: &str,
        model_id: impl Into<String>,
        pooling_method: PoolingMethod,
        corpus_id: impl Into<String>,
        vector: Vec<f32>,
        request_time: DateTime<Utc>,
    ) -> Self {
        let embedding_hash = vector_hash(&vector);
        Self {
            text_hash: text_hash(text),
            model_id: model_id.into(),
            pooling_method,
            corpus_id: corpus_id.into(),
            vector,
            embedding_hash,
            request_time,
            response_time: Utc::now(),
            source_document_hash: None,
            stale: false,
        }
    }

    /// Attach the owning document reference.
    pub fn with_source_document(mut self, document_hash: impl Into<String>) -> Self {
        self.source_document_hash = Some(document_hash.into());
        self
    }

    /// Recompute the vector digest and compare against the stored one.
    pub fn verify_integrity(&self) -> bool {
        vector_hash(&self.vector) == self.embedding_hash
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// One sentence's embedding outcome inside a document ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentenceEmbedding {
    pub sentence: String,
    pub vector: Vec<f32>,
    pub embedding_hash: String,
}

/// A stored document and its per-sentence embedding results.
///
/// Owns its sentence embeddings: they commit in the same storage batch or
/// not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// SHA-256 over the raw document bytes
    pub document_hash: String,
    pub filename: String,
    pub mimetype: String,
    #[serde(default)]
    pub corpus_id: String,
    pub size_bytes: u64,
    /// Extracted sentences, in document order
    pub sentences: Vec<String>,
    /// zstd-compressed JSON of Vec<SentenceEmbedding>
    #[serde(with = "serde_bytes_b64")]
    pub compressed_results: Vec<u8>,
    /// SHA-256(document_hash + model_id + pooling)
    pub document_embedding_hash: String,
    pub model_id: String,
    pub pooling_method: PoolingMethod,
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
}

impl DocumentRecord {
    /// Compress and attach per-sentence results.
    pub fn set_results(&mut self, results: &[SentenceEmbedding]) -> Result<(), TypesError> {
        let json = serde_json::to_vec(results)
            .map_err(|e| TypesError::Serialization(e.to_string()))?;
        self.compressed_results = zstd::encode_all(json.as_slice(), 0)
            .map_err(|e| TypesError::Compression(e.to_string()))?;
        Ok(())
    }

    /// Decompress the per-sentence results.
    pub fn results(&self) -> Result<Vec<SentenceEmbedding>, TypesError> {
        if self.compressed_results.is_empty() {
            return Ok(Vec::new());
        }
        let json = zstd::decode_all(self.compressed_results.as_slice())
            .map_err(|e| TypesError::Compression(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| TypesError::Serialization(e.to_string()))
    }

    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// A stored audio transcript produced by the transcription collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    /// SHA-256 over the raw audio bytes
    pub audio_hash: String,
    pub filename: String,
    pub size_mb: f64,
    /// Segment texts in playback order
    pub segments: Vec<String>,
    pub combined_text: String,
    /// Collaborator-supplied metadata (timings, confidences)
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub corpus_id: String,
    pub request_time: DateTime<Utc>,
    pub response_time: DateTime<Utc>,
}

impl TranscriptRecord {
    /// Serialize to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Base64 codec for binary blobs inside JSON record bodies.
mod serde_bytes_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}
