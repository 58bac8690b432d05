//! Two-stage similarity search.
//!
//! Coarse stage: the HNSW shard narrows the corpus to a candidate set
//! sized by a filter percentage, scored by cosine similarity. Refinement
//! stage: each candidate's exact stored vector is compared against the
//! query with the statistical measures and the set is re-ranked by the
//! chosen primary measure.
//!
//! Refinement only reorders and filters; it never introduces a candidate
//! the coarse stage did not produce. Ties in the primary measure break by
//! coarse rank, so ordering is stable.

use std::sync::Arc;

use tracing::{debug, warn};

use semvec_index::IndexManager;
use semvec_storage::EmbeddingStore;
use semvec_types::PoolingMethod;

use crate::error::SearchError;
use crate::measures::{compute_measures, MeasureScores, SimilarityMeasure};

/// Coarse-stage hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub text_hash: String,
    /// Cosine similarity from the approximate index
    pub score: f32,
}

/// Refined hit with per-measure scores.
#[derive(Debug, Clone)]
pub struct RefinedHit {
    pub text_hash: String,
    /// Position in the coarse candidate list (0 = best coarse score)
    pub coarse_rank: usize,
    pub coarse_score: f32,
    pub scores: MeasureScores,
}

/// Read-only query engine over the index manager and the store.
pub struct SimilaritySearch {
    index: Arc<IndexManager>,
    store: Arc<EmbeddingStore>,
}

impl SimilaritySearch {
    pub fn new(index: Arc<IndexManager>, store: Arc<EmbeddingStore>) -> Self {
        Self { index, store }
    }

    /// Candidate count for the coarse stage: a fraction of the corpus,
    /// never below one.
    pub fn candidate_count(corpus_size: usize, filter_pct: f64) -> usize {
        ((corpus_size as f64 * filter_pct).ceil() as usize).max(1)
    }

    /// Single-stage search: coarse cosine ranking, at most k hits.
    ///
    /// An empty or unknown corpus yields an empty result, not an error.
    pub fn search(
        &self,
        model_id: &str,
        pooling: PoolingMethod,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let hits = self.index.lookup(model_id, pooling, query, k)?;
        Ok(dedup_by_hash(hits)
            .into_iter()
            .map(|(text_hash, score)| SearchHit { text_hash, score })
            .collect())
    }

    /// Two-stage search: coarse filter sized by `filter_pct`, then exact
    /// statistical refinement ranked by `primary`, truncated to k.
    pub fn advanced_search(
        &self,
        model_id: &str,
        pooling: PoolingMethod,
        query: &[f32],
        filter_pct: f64,
        k: usize,
        primary: SimilarityMeasure,
    ) -> Result<Vec<RefinedHit>, SearchError> {
        if !(0.0..=1.0).contains(&filter_pct) {
            return Err(SearchError::InvalidInput(format!(
                "filter_pct must be 0.0-1.0, got {}",
                filter_pct
            )));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let corpus_size = self.index.corpus_size(model_id, pooling);
        if corpus_size == 0 {
            return Ok(Vec::new());
        }

        let coarse_k = Self::candidate_count(corpus_size, filter_pct);
        let candidates = dedup_by_hash(self.index.lookup(model_id, pooling, query, coarse_k)?);
        debug!(
            corpus = corpus_size,
            coarse_k = coarse_k,
            candidates = candidates.len(),
            "Coarse stage complete"
        );

        let mut refined = Vec::with_capacity(candidates.len());
        for (coarse_rank, (text_hash, coarse_score)) in candidates.into_iter().enumerate() {
            // The shard may predate recent writes or purges; a candidate
            // missing from the store is skipped, not an error.
            let Some(record) = self.store.find_embedding(model_id, pooling, &text_hash)? else {
                warn!(text_hash = %text_hash, "Coarse candidate missing from store, skipping");
                continue;
            };
            let scores = match compute_measures(query, &record.vector) {
                Ok(scores) => scores,
                Err(e) => {
                    warn!(text_hash = %text_hash, error = %e, "Refinement failed, skipping");
                    continue;
                }
            };
            refined.push(RefinedHit {
                text_hash,
                coarse_rank,
                coarse_score,
                scores,
            });
        }

        refined.sort_by(|a, b| {
            primary
                .score_of(&b.scores)
                .partial_cmp(&primary.score_of(&a.scores))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.coarse_rank.cmp(&b.coarse_rank))
        });
        refined.truncate(k);

        debug!(results = refined.len(), primary = %primary, "Refinement complete");
        Ok(refined)
    }
}

/// Corpus duplicates map adjacent shard rows to one text; keep the best
/// coarse score per hash, preserving order.
fn dedup_by_hash(hits: Vec<(String, f32)>) -> Vec<(String, f32)> {
    let mut seen = std::collections::HashSet::new();
    hits.into_iter()
        .filter(|(hash, _)| seen.insert(hash.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use semvec_index::HnswParams;
    use semvec_types::{text_hash, EmbeddingRecord};
    use tempfile::TempDir;

    fn setup() -> (Arc<EmbeddingStore>, Arc<IndexManager>, SimilaritySearch, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(EmbeddingStore::open(temp.path()).unwrap());
        let index = Arc::new(IndexManager::new(store.clone(), HnswParams::default()));
        let search = SimilaritySearch::new(index.clone(), store.clone());
        (store, index, search, temp)
    }

    fn put(store: &EmbeddingStore, text: &str, vector: Vec<f32>) {
        store
            .put(&EmbeddingRecord::new(
                text,
                "m1",
                PoolingMethod::Mean,
                "",
                vector,
                Utc::now(),
            ))
            .unwrap();
    }

    fn corpus(store: &EmbeddingStore) {
        put(store, "ascending", vec![1.0, 2.0, 3.0, 4.0]);
        put(store, "descending", vec![4.0, 3.0, 2.0, 1.0]);
        put(store, "flat-ish", vec![2.0, 2.1, 1.9, 2.0]);
        put(store, "spiky", vec![0.0, 9.0, 0.0, 9.0]);
    }

    #[test]
    fn test_empty_corpus_returns_empty() {
        let (_store, index, search, _temp) = setup();
        index.build("m1", PoolingMethod::Mean).unwrap();

        let query = vec![1.0, 2.0, 3.0, 4.0];
        assert!(search
            .search("m1", PoolingMethod::Mean, &query, 5)
            .unwrap()
            .is_empty());
        assert!(search
            .advanced_search("m1", PoolingMethod::Mean, &query, 0.2, 5, SimilarityMeasure::Aggregate)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_search_respects_k_and_ordering() {
        let (store, index, search, _temp) = setup();
        corpus(&store);
        index.build("m1", PoolingMethod::Mean).unwrap();

        let query = vec![1.0, 2.0, 3.0, 4.0];
        let hits = search.search("m1", PoolingMethod::Mean, &query, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text_hash, text_hash("ascending"));
        assert!(hits[0].score >= hits[1].score);

        // Corpus smaller than k: return everything
        let hits = search.search("m1", PoolingMethod::Mean, &query, 50).unwrap();
        assert_eq!(hits.len(), 4);
    }

    #[test]
    fn test_candidate_count_floor() {
        assert_eq!(SimilaritySearch::candidate_count(0, 0.02), 1);
        assert_eq!(SimilaritySearch::candidate_count(10, 0.02), 1);
        assert_eq!(SimilaritySearch::candidate_count(1_000, 0.02), 20);
    }

    #[test]
    fn test_refinement_never_introduces_candidates() {
        let (store, index, search, _temp) = setup();
        corpus(&store);
        index.build("m1", PoolingMethod::Mean).unwrap();

        let query = vec![1.0, 2.0, 3.0, 4.0];
        // filter_pct 0.5 over 4 rows -> 2 coarse candidates
        let coarse = search.search("m1", PoolingMethod::Mean, &query, 2).unwrap();
        let coarse_hashes: Vec<&str> = coarse.iter().map(|h| h.text_hash.as_str()).collect();

        let refined = search
            .advanced_search("m1", PoolingMethod::Mean, &query, 0.5, 10, SimilarityMeasure::Aggregate)
            .unwrap();
        assert!(refined.len() <= 2);
        for hit in &refined {
            assert!(
                coarse_hashes.contains(&hit.text_hash.as_str()),
                "{} was not a coarse candidate",
                hit.text_hash
            );
        }
    }

    #[test]
    fn test_advanced_search_ranks_by_primary_measure() {
        let (store, index, search, _temp) = setup();
        corpus(&store);
        index.build("m1", PoolingMethod::Mean).unwrap();

        let query = vec![1.0, 2.0, 3.0, 4.0];
        let refined = search
            .advanced_search(
                "m1",
                PoolingMethod::Mean,
                &query,
                1.0,
                4,
                SimilarityMeasure::SpearmanRho,
            )
            .unwrap();

        assert_eq!(refined[0].text_hash, text_hash("ascending"));
        assert!((refined[0].scores.spearman_rho - 1.0).abs() < 1e-9);
        for pair in refined.windows(2) {
            assert!(pair[0].scores.spearman_rho >= pair[1].scores.spearman_rho);
        }
        // The perfectly anti-correlated text lands last
        assert_eq!(refined.last().unwrap().text_hash, text_hash("descending"));
    }

    #[test]
    fn test_ties_break_by_coarse_rank() {
        let (store, index, search, _temp) = setup();
        // Two distinct texts with identical vectors: identical measures
        put(&store, "twin-a", vec![1.0, 2.0, 3.0, 4.0]);
        put(&store, "twin-b", vec![1.0, 2.0, 3.0, 4.0]);
        index.build("m1", PoolingMethod::Mean).unwrap();

        let query = vec![1.0, 2.0, 3.0, 4.0];
        let coarse = search.search("m1", PoolingMethod::Mean, &query, 2).unwrap();
        let refined = search
            .advanced_search("m1", PoolingMethod::Mean, &query, 1.0, 2, SimilarityMeasure::Aggregate)
            .unwrap();

        assert_eq!(refined.len(), 2);
        assert_eq!(refined[0].scores, refined[1].scores);
        // Stable: refined order equals coarse order
        assert_eq!(refined[0].text_hash, coarse[0].text_hash);
        assert_eq!(refined[1].text_hash, coarse[1].text_hash);
        assert!(refined[0].coarse_rank < refined[1].coarse_rank);
    }

    #[test]
    fn test_invalid_filter_pct_rejected() {
        let (_store, _index, search, _temp) = setup();
        let query = vec![1.0, 2.0, 3.0, 4.0];
        assert!(search
            .advanced_search("m1", PoolingMethod::Mean, &query, 1.5, 5, SimilarityMeasure::Aggregate)
            .is_err());
    }

    #[test]
    fn test_fewer_coarse_candidates_than_k() {
        let (store, index, search, _temp) = setup();
        corpus(&store);
        index.build("m1", PoolingMethod::Mean).unwrap();

        // 4 rows at 25% -> 1 coarse candidate; k = 3 still works
        let query = vec![1.0, 2.0, 3.0, 4.0];
        let refined = search
            .advanced_search("m1", PoolingMethod::Mean, &query, 0.25, 3, SimilarityMeasure::Aggregate)
            .unwrap();
        assert_eq!(refined.len(), 1);
    }

    #[test]
    fn test_stale_candidate_is_skipped() {
        let (store, index, search, _temp) = setup();
        corpus(&store);
        index.build("m1", PoolingMethod::Mean).unwrap();

        // Purge everything after the build: the shard is stale
        store.purge_expired(chrono::Duration::seconds(-1)).unwrap();

        let query = vec![1.0, 2.0, 3.0, 4.0];
        let refined = search
            .advanced_search("m1", PoolingMethod::Mean, &query, 1.0, 4, SimilarityMeasure::Aggregate)
            .unwrap();
        assert!(refined.is_empty(), "stale candidates must be skipped, not fail");
    }
}
