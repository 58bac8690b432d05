//! # semvec-search
//!
//! Two-stage similarity search: an approximate HNSW filter narrows the
//! corpus, then exact statistical measures (rank correlation, concordance,
//! distance correlation, distributional divergence, dependence) re-rank
//! the candidates. Read-only: never mutates store or index state.

pub mod error;
pub mod measures;
pub mod searcher;

pub use error::SearchError;
pub use measures::{
    compute_measures, distance_correlation, hoeffding_d, jensen_shannon_dependency, kendall_tau,
    spearman_rho, MeasureScores, SimilarityMeasure,
};
pub use searcher::{RefinedHit, SearchHit, SimilaritySearch};
