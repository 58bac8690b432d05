//! Pooling reductions: (tokens x dim) matrix -> one fixed-length vector.
//!
//! Every method is deterministic, so identical texts always pool to
//! identical vectors and the content-addressed cache stays coherent. The
//! output length depends only on the model dimension and the method (see
//! [`PoolingMethod::output_dim`]).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use semvec_types::PoolingMethod;

use crate::error::EmbeddingError;
use crate::linalg::{center_columns, column_means, scaled_gram, top_eigenpairs};

/// Fixed seed for the random-projection matrix. Changing it invalidates
/// every cached gaussian_random_projection vector.
const PROJECTION_SEED: u64 = 0x5EE0_1234_ABCD_0001;

/// Components extracted by the decomposition-based methods.
const SVD_COMPONENTS: usize = 2;
const SVD_FIRST_FOUR_COMPONENTS: usize = 4;
const ICA_COMPONENTS: usize = 2;
const FACTOR_COMPONENTS: usize = 2;
const PROJECTION_COMPONENTS: usize = 2;

/// Reduce a token-level embedding matrix to one pooled vector.
pub fn pool(matrix: &[Vec<f32>], method: PoolingMethod) -> Result<Vec<f32>, EmbeddingError> {
    validate(matrix)?;
    let pooled = match method {
        PoolingMethod::Mean => column_means(matrix),
        PoolingMethod::MinsMaxes => mins_maxes(matrix),
        PoolingMethod::Svd => flatten(svd_components(matrix, SVD_COMPONENTS)),
        PoolingMethod::SvdFirstFour => {
            flatten(svd_components(matrix, SVD_FIRST_FOUR_COMPONENTS))
        }
        PoolingMethod::Ica => flatten(ica_components(matrix, ICA_COMPONENTS)),
        PoolingMethod::FactorAnalysis => flatten(factor_loadings(matrix, FACTOR_COMPONENTS)),
        PoolingMethod::GaussianRandomProjection => {
            flatten(gaussian_projection(matrix, PROJECTION_COMPONENTS))
        }
    };
    debug_assert_eq!(pooled.len(), method.output_dim(matrix[0].len()));
    Ok(pooled)
}

fn validate(matrix: &[Vec<f32>]) -> Result<(), EmbeddingError> {
    if matrix.is_empty() || matrix[0].is_empty() {
        return Err(EmbeddingError::Pooling(
            "Empty token matrix".to_string(),
        ));
    }
    let dim = matrix[0].len();
    if matrix.iter().any(|row| row.len() != dim) {
        return Err(EmbeddingError::Pooling(
            "Ragged token matrix".to_string(),
        ));
    }
    Ok(())
}

fn flatten(components: Vec<Vec<f32>>) -> Vec<f32> {
    components.into_iter().flatten().collect()
}

/// Per-dimension minimum concatenated with per-dimension maximum.
fn mins_maxes(matrix: &[Vec<f32>]) -> Vec<f32> {
    let dim = matrix[0].len();
    let mut mins = matrix[0].clone();
    let mut maxes = matrix[0].clone();
    for row in &matrix[1..] {
        for i in 0..dim {
            mins[i] = mins[i].min(row[i]);
            maxes[i] = maxes[i].max(row[i]);
        }
    }
    mins.extend(maxes);
    mins
}

/// Top-k right singular directions of the raw token matrix, each scaled by
/// its singular value. Rank-deficient inputs pad with zero vectors so the
/// output length stays fixed.
fn svd_components(matrix: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
    let gram = scaled_gram(matrix);
    let rows = matrix.len() as f32;
    top_eigenpairs(&gram, k)
        .into_iter()
        .map(|(eigenvalue, mut v)| {
            // Gram eigenvalue = sigma^2 / rows
            let sigma = (eigenvalue * rows).max(0.0).sqrt();
            for x in v.iter_mut() {
                *x *= sigma;
            }
            v
        })
        .collect()
}

/// Principal-axis factor loadings: eigenvectors of the column covariance
/// scaled by the square root of their eigenvalues.
fn factor_loadings(matrix: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
    let centered = center_columns(matrix);
    let cov = scaled_gram(&centered);
    top_eigenpairs(&cov, k)
        .into_iter()
        .map(|(eigenvalue, mut v)| {
            let scale = eigenvalue.max(0.0).sqrt();
            for x in v.iter_mut() {
                *x *= scale;
            }
            v
        })
        .collect()
}

/// FastICA with tanh contrast, run in the whitened top-k principal
/// subspace; returns k component directions mapped back to the original
/// space. Initialization is deterministic.
fn ica_components(matrix: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
    const MAX_ITERS: usize = 200;
    const TOL: f32 = 1e-5;

    let centered = center_columns(matrix);
    let cov = scaled_gram(&centered);
    let pairs = top_eigenpairs(&cov, k);

    // Degenerate corpus (single token, constant rows): covariance is ~0,
    // fall back to scaled principal axes of the raw matrix.
    if pairs.iter().all(|(eigenvalue, _)| *eigenvalue <= 1e-9) {
        return svd_components(matrix, k);
    }

    let n = centered.len();
    let dim = centered[0].len();

    // Whitened samples: y = diag(1/sqrt(lambda)) Vᵀ x, one per token
    let whitened: Vec<Vec<f32>> = centered
        .iter()
        .map(|row| {
            pairs
                .iter()
                .map(|(eigenvalue, v)| {
                    if *eigenvalue > 1e-9 {
                        crate::linalg::dot(v, row) / eigenvalue.sqrt()
                    } else {
                        0.0
                    }
                })
                .collect()
        })
        .collect();

    // Deflationary fixed-point iteration
    let mut unmixing: Vec<Vec<f32>> = Vec::with_capacity(k);
    for component in 0..k {
        let mut w: Vec<f32> = (0..k)
            .map(|i| if i == component { 1.0 } else { 0.1 })
            .collect();
        crate::linalg::normalize(&mut w);

        for _ in 0..MAX_ITERS {
            // w+ = E[y * tanh(wᵀy)] - E[1 - tanh²(wᵀy)] * w
            let mut expectation = vec![0.0f32; k];
            let mut derivative_sum = 0.0f32;
            for y in &whitened {
                let projected = crate::linalg::dot(&w, y);
                let g = projected.tanh();
                let g_prime = 1.0 - g * g;
                derivative_sum += g_prime;
                for (e, yi) in expectation.iter_mut().zip(y.iter()) {
                    *e += yi * g;
                }
            }
            let mut next: Vec<f32> = expectation
                .iter()
                .zip(w.iter())
                .map(|(e, wi)| e / n as f32 - (derivative_sum / n as f32) * wi)
                .collect();

            // Gram-Schmidt against previously extracted components
            for prev in &unmixing {
                let proj = crate::linalg::dot(&next, prev);
                for (x, p) in next.iter_mut().zip(prev.iter()) {
                    *x -= proj * p;
                }
            }
            crate::linalg::normalize(&mut next);
            if crate::linalg::norm(&next) == 0.0 {
                next = w.clone();
                break;
            }

            let convergence = crate::linalg::dot(&next, &w).abs();
            w = next;
            if (1.0 - convergence) < TOL {
                break;
            }
        }
        unmixing.push(w);
    }

    // Map back: a = V diag(sqrt(lambda)) w, a direction in R^dim
    unmixing
        .into_iter()
        .map(|w| {
            let mut direction = vec![0.0f32; dim];
            for ((eigenvalue, v), wi) in pairs.iter().zip(w.iter()) {
                if *eigenvalue <= 1e-9 {
                    continue;
                }
                let scale = eigenvalue.sqrt() * wi;
                for (d, vi) in direction.iter_mut().zip(v.iter()) {
                    *d += scale * vi;
                }
            }
            direction
        })
        .collect()
}

/// Project the token axis through a seeded Gaussian matrix: k mixed rows,
/// each a weighted combination of all token vectors. Deterministic for a
/// given token count.
fn gaussian_projection(matrix: &[Vec<f32>], k: usize) -> Vec<Vec<f32>> {
    let n = matrix.len();
    let dim = matrix[0].len();
    let mut rng = StdRng::seed_from_u64(PROJECTION_SEED);
    let scale = 1.0 / (n as f32).sqrt();

    (0..k)
        .map(|_| {
            let weights: Vec<f32> = (0..n).map(|_| gaussian_sample(&mut rng)).collect();
            let mut out = vec![0.0f32; dim];
            for (w, row) in weights.iter().zip(matrix.iter()) {
                for (o, v) in out.iter_mut().zip(row.iter()) {
                    *o += w * v * scale;
                }
            }
            out
        })
        .collect()
}

/// Box-Muller standard normal sample.
fn gaussian_sample(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}
