//! One immutable index shard per (model, pooling) pair.
//!
//! A shard is an HNSW structure plus a row-aligned list of text hashes:
//! vector id i resolves to text_hashes[i]. Shards are built from a single
//! ordered store scan and never mutated afterwards; freshness comes from
//! building a replacement and swapping it in.
//!
//! HNSW parameters tuned for quality over speed:
//! - M = 16 (connections per layer)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 100 (search-time quality)

use tracing::debug;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use semvec_types::EmbeddingRecord;

use crate::error::IndexError;

/// HNSW construction parameters.
#[derive(Debug, Clone)]
pub struct HnswParams {
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            connectivity: 16,
            expansion_add: 200,
            expansion_search: 100,
        }
    }
}

impl HnswParams {
    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.connectivity = m;
        self
    }

    pub fn with_expansion(mut self, ef_add: usize, ef_search: usize) -> Self {
        self.expansion_add = ef_add;
        self.expansion_search = ef_search;
        self
    }
}

/// Immutable coarse-search shard. Safe to share across readers; the
/// underlying index is only written during [`IndexShard::build`].
pub struct IndexShard {
    /// None for an empty corpus: lookups return nothing
    index: Option<Index>,
    /// Row i holds the text hash for vector id i
    text_hashes: Vec<String>,
    dimension: usize,
}

impl IndexShard {
    /// Shard over an empty corpus.
    pub fn empty() -> Self {
        Self {
            index: None,
            text_hashes: Vec::new(),
            dimension: 0,
        }
    }

    /// Build a shard from records in store scan order.
    ///
    /// The caller guarantees the slice comes from one ordered scan; row i
    /// of the shard is records[i].
    pub fn build(records: &[EmbeddingRecord], params: &HnswParams) -> Result<Self, IndexError> {
        if records.is_empty() {
            return Ok(Self::empty());
        }

        let dimension = records[0].vector.len();
        for record in records {
            if record.vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
        }

        let options = IndexOptions {
            dimensions: dimension,
            metric: MetricKind::Cos, // Cosine similarity for the coarse stage
            quantization: ScalarKind::F32,
            connectivity: params.connectivity,
            expansion_add: params.expansion_add,
            expansion_search: params.expansion_search,
            multi: false, // Single vector per key
        };

        let index = Index::new(&options).map_err(|e| IndexError::Index(e.to_string()))?;
        index
            .reserve(records.len())
            .map_err(|e| IndexError::Index(e.to_string()))?;

        let mut text_hashes = Vec::with_capacity(records.len());
        for (row, record) in records.iter().enumerate() {
            index
                .add(row as u64, &record.vector)
                .map_err(|e| IndexError::Index(e.to_string()))?;
            text_hashes.push(record.text_hash.clone());
        }

        debug!(rows = text_hashes.len(), dim = dimension, "Shard built");
        Ok(Self {
            index: Some(index),
            text_hashes,
            dimension,
        })
    }

    /// Number of vectors in the shard.
    pub fn len(&self) -> usize {
        self.text_hashes.len()
    }

    /// True when the corpus behind this shard was empty.
    pub fn is_empty(&self) -> bool {
        self.text_hashes.is_empty()
    }

    /// Vector length this shard was built with (0 when empty).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Text hash stored at the given row.
    pub fn text_hash_at(&self, row: usize) -> Option<&str> {
        self.text_hashes.get(row).map(|s| s.as_str())
    }

    /// K nearest neighbors by cosine similarity, best first.
    ///
    /// Returns (text_hash, approximate_score) pairs, at most k of them.
    pub fn lookup(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        let Some(index) = &self.index else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let matches = index
            .search(query, k)
            .map_err(|e| IndexError::Index(e.to_string()))?;

        let results: Vec<(String, f32)> = matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(&row, &distance)| {
                self.text_hashes
                    .get(row as usize)
                    // Cosine distance -> similarity
                    .map(|hash| (hash.clone(), 1.0 - distance))
            })
            .collect();

        debug!(k = k, found = results.len(), "Coarse lookup complete");
        Ok(results)
    }
}
