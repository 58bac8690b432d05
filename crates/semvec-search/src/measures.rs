//! Exact statistical similarity measures for the refinement stage.
//!
//! Five measures over a pair of equal-length vectors:
//! - spearman_rho: rank correlation
//! - kendall_tau: concordance (tau-b, tie-corrected)
//! - distance_correlation: distance correlation, subsampled on long vectors
//! - jensen_shannon_dependency: 1 minus the Jensen-Shannon divergence of
//!   the vectors read as distributions
//! - hoeffding_d: Hoeffding's dependence statistic
//!
//! All return values in [-1, 1] (hoeffding_d in [-0.5, 1]); the aggregate
//! is their clamped mean.

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Quadratic-cost measures subsample down to this many points. Stride
/// sampling keeps the subsample deterministic.
const MAX_QUADRATIC_POINTS: usize = 256;

/// Per-measure scores for one vector pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeasureScores {
    pub spearman_rho: f64,
    pub kendall_tau: f64,
    pub distance_correlation: f64,
    pub jensen_shannon_dependency: f64,
    pub hoeffding_d: f64,
    /// Mean of the five, each clamped to [-1, 1]
    pub aggregate: f64,
}

/// Which measure ranks the refined results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMeasure {
    SpearmanRho,
    KendallTau,
    DistanceCorrelation,
    JensenShannonDependency,
    HoeffdingD,
    #[default]
    Aggregate,
}

impl SimilarityMeasure {
    /// Stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SimilarityMeasure::SpearmanRho => "spearman_rho",
            SimilarityMeasure::KendallTau => "kendall_tau",
            SimilarityMeasure::DistanceCorrelation => "distance_correlation",
            SimilarityMeasure::JensenShannonDependency => "jensen_shannon_dependency",
            SimilarityMeasure::HoeffdingD => "hoeffding_d",
            SimilarityMeasure::Aggregate => "aggregate",
        }
    }

    /// Parse from the snake_case name.
    pub fn parse(name: &str) -> Result<Self, SearchError> {
        [
            SimilarityMeasure::SpearmanRho,
            SimilarityMeasure::KendallTau,
            SimilarityMeasure::DistanceCorrelation,
            SimilarityMeasure::JensenShannonDependency,
            SimilarityMeasure::HoeffdingD,
            SimilarityMeasure::Aggregate,
        ]
        .into_iter()
        .find(|m| m.as_str() == name)
        .ok_or_else(|| SearchError::InvalidInput(format!("Unknown measure: {}", name)))
    }

    /// Extract this measure's value from a score set.
    pub fn score_of(&self, scores: &MeasureScores) -> f64 {
        match self {
            SimilarityMeasure::SpearmanRho => scores.spearman_rho,
            SimilarityMeasure::KendallTau => scores.kendall_tau,
            SimilarityMeasure::DistanceCorrelation => scores.distance_correlation,
            SimilarityMeasure::JensenShannonDependency => scores.jensen_shannon_dependency,
            SimilarityMeasure::HoeffdingD => scores.hoeffding_d,
            SimilarityMeasure::Aggregate => scores.aggregate,
        }
    }
}

impl std::fmt::Display for SimilarityMeasure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute all five measures plus the aggregate.
pub fn compute_measures(a: &[f32], b: &[f32]) -> Result<MeasureScores, SearchError> {
    if a.len() != b.len() {
        return Err(SearchError::InvalidInput(format!(
            "Vector length mismatch: {} vs {}",
            a.len(),
            b.len()
        )));
    }
    if a.len() < 2 {
        return Err(SearchError::InvalidInput(
            "Vectors must have at least 2 components".to_string(),
        ));
    }

    let spearman = spearman_rho(a, b);
    let kendall = kendall_tau(a, b);
    let (xs, ys) = subsample(a, b);
    let dcor = distance_correlation(&xs, &ys);
    let jsd = jensen_shannon_dependency(a, b);
    let hoeffding = hoeffding_d(&xs, &ys);

    let components = [spearman, kendall, dcor, jsd, hoeffding];
    let aggregate =
        components.iter().map(|v| v.clamp(-1.0, 1.0)).sum::<f64>() / components.len() as f64;

    Ok(MeasureScores {
        spearman_rho: spearman,
        kendall_tau: kendall,
        distance_correlation: dcor,
        jensen_shannon_dependency: jsd,
        hoeffding_d: hoeffding,
        aggregate,
    })
}

/// Deterministic stride subsample for the quadratic-cost measures.
fn subsample(a: &[f32], b: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let n = a.len();
    if n <= MAX_QUADRATIC_POINTS {
        return (a.to_vec(), b.to_vec());
    }
    let step = n.div_ceil(MAX_QUADRATIC_POINTS);
    let xs: Vec<f32> = a.iter().step_by(step).copied().collect();
    let ys: Vec<f32> = b.iter().step_by(step).copied().collect();
    (xs, ys)
}

/// Average ranks, ties shared (1-based).
fn ranks(values: &[f32]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        values[i]
            .partial_cmp(&values[j])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let shared = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            out[idx] = shared;
        }
        i = j + 1;
    }
    out
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        cov / denom
    }
}

/// Spearman's rank correlation: Pearson over average ranks.
pub fn spearman_rho(a: &[f32], b: &[f32]) -> f64 {
    pearson(&ranks(a), &ranks(b))
}

/// Kendall's tau-b: concordant minus discordant pairs, tie-corrected.
pub fn kendall_tau(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len();
    let mut concordant = 0.0f64;
    let mut discordant = 0.0f64;
    let mut ties_a = 0.0f64;
    let mut ties_b = 0.0f64;

    for i in 0..n {
        for j in (i + 1)..n {
            let dx = a[i] - a[j];
            let dy = b[i] - b[j];
            if dx == 0.0 && dy == 0.0 {
                continue;
            } else if dx == 0.0 {
                ties_a += 1.0;
            } else if dy == 0.0 {
                ties_b += 1.0;
            } else if (dx > 0.0) == (dy > 0.0) {
                concordant += 1.0;
            } else {
                discordant += 1.0;
            }
        }
    }

    let denom =
        ((concordant + discordant + ties_a) * (concordant + discordant + ties_b)).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (concordant - discordant) / denom
    }
}

/// Distance correlation over the (subsampled) component sequences.
/// 0 = independent, 1 = one is a function of the other.
pub fn distance_correlation(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len();
    if n < 2 {
        return 0.0;
    }

    let centered = |v: &[f32]| -> Vec<Vec<f64>> {
        let mut d = vec![vec![0.0f64; n]; n];
        for i in 0..n {
            for j in 0..n {
                d[i][j] = (v[i] as f64 - v[j] as f64).abs();
            }
        }
        let row_means: Vec<f64> = d.iter().map(|r| r.iter().sum::<f64>() / n as f64).collect();
        let grand = row_means.iter().sum::<f64>() / n as f64;
        for i in 0..n {
            for j in 0..n {
                d[i][j] = d[i][j] - row_means[i] - row_means[j] + grand;
            }
        }
        d
    };

    let da = centered(a);
    let db = centered(b);

    let mut dcov2 = 0.0;
    let mut dvar_a = 0.0;
    let mut dvar_b = 0.0;
    for i in 0..n {
        for j in 0..n {
            dcov2 += da[i][j] * db[i][j];
            dvar_a += da[i][j] * da[i][j];
            dvar_b += db[i][j] * db[i][j];
        }
    }
    let n2 = (n * n) as f64;
    dcov2 /= n2;
    dvar_a /= n2;
    dvar_b /= n2;

    let denom = (dvar_a * dvar_b).sqrt().sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (dcov2.max(0.0).sqrt() / denom).clamp(0.0, 1.0)
    }
}

/// 1 minus the Jensen-Shannon divergence (base 2, in [0, 1]) of the two
/// vectors read as probability distributions. 1 = identical distributions.
pub fn jensen_shannon_dependency(a: &[f32], b: &[f32]) -> f64 {
    const EPSILON: f64 = 1e-12;

    let to_distribution = |v: &[f32]| -> Vec<f64> {
        let min = v.iter().cloned().fold(f32::INFINITY, f32::min) as f64;
        let shifted: Vec<f64> = v.iter().map(|x| *x as f64 - min + EPSILON).collect();
        let total: f64 = shifted.iter().sum();
        shifted.into_iter().map(|x| x / total).collect()
    };

    let p = to_distribution(a);
    let q = to_distribution(b);

    let mut divergence = 0.0;
    for (pi, qi) in p.iter().zip(q.iter()) {
        let mi = (pi + qi) / 2.0;
        if *pi > 0.0 {
            divergence += pi * (pi / mi).log2() / 2.0;
        }
        if *qi > 0.0 {
            divergence += qi * (qi / mi).log2() / 2.0;
        }
    }

    1.0 - divergence.clamp(0.0, 1.0)
}

/// Hoeffding's D over the (subsampled) component sequences. 1 = perfect
/// dependence (monotone either way), ~0 = independent; can dip slightly
/// negative on small samples.
pub fn hoeffding_d(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len();
    if n < 5 {
        return 0.0;
    }
    let nf = n as f64;

    let r = ranks(a);
    let s = ranks(b);

    // Q_i: points strictly below point i in both coordinates (1-based)
    let q: Vec<f64> = (0..n)
        .map(|i| {
            let mut count = 1.0;
            for j in 0..n {
                if j != i && r[j] < r[i] && s[j] < s[i] {
                    count += 1.0;
                }
            }
            count
        })
        .collect();

    let d1: f64 = q.iter().map(|qi| (qi - 1.0) * (qi - 2.0)).sum();
    let d2: f64 = (0..n)
        .map(|i| (r[i] - 1.0) * (r[i] - 2.0) * (s[i] - 1.0) * (s[i] - 2.0))
        .sum();
    let d3: f64 = (0..n)
        .map(|i| (r[i] - 2.0) * (s[i] - 2.0) * (q[i] - 1.0))
        .sum();

    let numerator = (nf - 2.0) * (nf - 3.0) * d1 + d2 - 2.0 * (nf - 2.0) * d3;
    let denominator = nf * (nf - 1.0) * (nf - 2.0) * (nf - 3.0) * (nf - 4.0);

    30.0 * numerator / denominator
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ascending(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    #[test]
    fn test_identical_vectors_score_one() {
        let x = ascending(16);
        let scores = compute_measures(&x, &x).unwrap();
        assert!((scores.spearman_rho - 1.0).abs() < 1e-9);
        assert!((scores.kendall_tau - 1.0).abs() < 1e-9);
        assert!((scores.distance_correlation - 1.0).abs() < 1e-6);
        assert!((scores.jensen_shannon_dependency - 1.0).abs() < 1e-9);
        assert!((scores.hoeffding_d - 1.0).abs() < 1e-6);
        assert!((scores.aggregate - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_reversed_ranks_score_minus_one() {
        let x = ascending(16);
        let y: Vec<f32> = x.iter().rev().copied().collect();
        assert!((spearman_rho(&x, &y) + 1.0).abs() < 1e-9);
        assert!((kendall_tau(&x, &y) + 1.0).abs() < 1e-9);
        // Dependence measures see perfect (negative) dependence
        assert!((hoeffding_d(&x, &y) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_constant_vector_is_zero_correlation() {
        let x = ascending(10);
        let y = vec![3.0f32; 10];
        assert_eq!(spearman_rho(&x, &y), 0.0);
        assert_eq!(kendall_tau(&x, &y), 0.0);
        assert_eq!(distance_correlation(&x, &y), 0.0);
    }

    #[test]
    fn test_ranks_with_ties_are_averaged() {
        let r = ranks(&[1.0, 2.0, 2.0, 3.0]);
        assert_eq!(r, vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_jensen_shannon_bounds() {
        // Mass concentrated on disjoint components: maximal divergence
        let p = vec![1.0f32, 0.0, 0.0, 0.0];
        let q = vec![0.0f32, 0.0, 0.0, 1.0];
        let dep = jensen_shannon_dependency(&p, &q);
        assert!(dep >= 0.0 && dep < 0.1, "got {}", dep);

        let same = jensen_shannon_dependency(&p, &p);
        assert!((same - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hoeffding_small_sample_is_zero() {
        assert_eq!(hoeffding_d(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_hoeffding_independent_is_near_zero() {
        // A deterministic low-dependence interleaving
        let x: Vec<f32> = (0..64).map(|i| i as f32).collect();
        let y: Vec<f32> = (0..64).map(|i| ((i * 37) % 64) as f32).collect();
        let d = hoeffding_d(&x, &y);
        assert!(d.abs() < 0.25, "got {}", d);
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        assert!(compute_measures(&[1.0, 2.0], &[1.0]).is_err());
        assert!(compute_measures(&[1.0], &[1.0]).is_err());
    }

    #[test]
    fn test_subsample_keeps_short_vectors() {
        let x = ascending(100);
        let (xs, ys) = subsample(&x, &x);
        assert_eq!(xs.len(), 100);
        assert_eq!(ys.len(), 100);
    }

    #[test]
    fn test_subsample_bounds_long_vectors() {
        let x = ascending(10_000);
        let (xs, _) = subsample(&x, &x);
        assert!(xs.len() <= MAX_QUADRATIC_POINTS);
        assert!(xs.len() >= MAX_QUADRATIC_POINTS / 2);
    }

    #[test]
    fn test_measure_parse_roundtrip() {
        for name in [
            "spearman_rho",
            "kendall_tau",
            "distance_correlation",
            "jensen_shannon_dependency",
            "hoeffding_d",
            "aggregate",
        ] {
            assert_eq!(SimilarityMeasure::parse(name).unwrap().as_str(), name);
        }
        assert!(SimilarityMeasure::parse("cosine").is_err());
    }

    #[test]
    fn test_aggregate_is_mean_of_clamped_components() {
        let x = ascending(16);
        let y: Vec<f32> = x.iter().map(|v| v * 2.0 + 1.0).collect();
        let scores = compute_measures(&x, &y).unwrap();
        let expected = (scores.spearman_rho.clamp(-1.0, 1.0)
            + scores.kendall_tau.clamp(-1.0, 1.0)
            + scores.distance_correlation.clamp(-1.0, 1.0)
            + scores.jensen_shannon_dependency.clamp(-1.0, 1.0)
            + scores.hoeffding_d.clamp(-1.0, 1.0))
            / 5.0;
        assert!((scores.aggregate - expected).abs() < 1e-12);
    }
}
