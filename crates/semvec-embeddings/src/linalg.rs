//! Small dense linear algebra kernels for the pooling reductions.
//!
//! Matrices are row-major `Vec<Vec<f32>>` with one row per token. The
//! dimensions here are small (hundreds), so plain power iteration with
//! deflation is enough; no external solver is pulled in.

/// Dot product of two equal-length slices.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Euclidean norm.
pub fn norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Normalize in place; a zero vector is left untouched.
pub fn normalize(v: &mut [f32]) {
    let n = norm(v);
    if n > 0.0 {
        for x in v.iter_mut() {
            *x /= n;
        }
    }
}

/// Per-column means of a (rows x cols) matrix.
pub fn column_means(matrix: &[Vec<f32>]) -> Vec<f32> {
    let rows = matrix.len();
    let cols = matrix[0].len();
    let mut means = vec![0.0f32; cols];
    for row in matrix {
        for (m, v) in means.iter_mut().zip(row.iter()) {
            *m += v;
        }
    }
    for m in means.iter_mut() {
        *m /= rows as f32;
    }
    means
}

/// Subtract the column means from every row.
pub fn center_columns(matrix: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let means = column_means(matrix);
    matrix
        .iter()
        .map(|row| row.iter().zip(means.iter()).map(|(v, m)| v - m).collect())
        .collect()
}

/// Gram matrix MᵀM of a (rows x cols) matrix, scaled by 1/rows.
///
/// Symmetric (cols x cols); its eigenvectors are the right singular
/// vectors of M and its eigenvalues the squared singular values / rows.
pub fn scaled_gram(matrix: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let rows = matrix.len();
    let cols = matrix[0].len();
    let mut gram = vec![vec![0.0f32; cols]; cols];
    for row in matrix {
        for i in 0..cols {
            let ri = row[i];
            if ri == 0.0 {
                continue;
            }
            for j in i..cols {
                gram[i][j] += ri * row[j];
            }
        }
    }
    let scale = 1.0 / rows as f32;
    for i in 0..cols {
        for j in i..cols {
            gram[i][j] *= scale;
            gram[j][i] = gram[i][j];
        }
    }
    gram
}

fn mat_vec(sym: &[Vec<f32>], v: &[f32]) -> Vec<f32> {
    sym.iter().map(|row| dot(row, v)).collect()
}

/// Top-k eigenpairs of a symmetric matrix via power iteration with
/// deflation. Returns (eigenvalue, eigenvector) pairs in descending
/// eigenvalue order; a component whose eigenvalue collapses to ~0 comes
/// back as a zero vector (rank-deficient input).
pub fn top_eigenpairs(sym: &[Vec<f32>], k: usize) -> Vec<(f32, Vec<f32>)> {
    const MAX_ITERS: usize = 300;
    const TOL: f32 = 1e-7;

    let n = sym.len();
    let mut deflated: Vec<Vec<f32>> = sym.to_vec();
    let mut pairs = Vec::with_capacity(k);

    for component in 0..k.min(n) {
        // Deterministic start vector, varied per component
        let mut v: Vec<f32> = (0..n)
            .map(|i| if i % (component + 1) == 0 { 1.0 } else { 0.5 })
            .collect();
        normalize(&mut v);

        let mut eigenvalue = 0.0f32;
        for _ in 0..MAX_ITERS {
            let mut next = mat_vec(&deflated, &v);
            let next_norm = norm(&next);
            if next_norm < TOL {
                eigenvalue = 0.0;
                break;
            }
            for x in next.iter_mut() {
                *x /= next_norm;
            }
            let delta: f32 = v
                .iter()
                .zip(next.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f32::max);
            v = next;
            eigenvalue = next_norm;
            if delta < TOL {
                break;
            }
        }

        if eigenvalue <= TOL {
            pairs.push((0.0, vec![0.0; n]));
            continue;
        }

        // Deflate: remove the found component
        for i in 0..n {
            for j in 0..n {
                deflated[i][j] -= eigenvalue * v[i] * v[j];
            }
        }
        pairs.push((eigenvalue, v));
    }

    // Pad if k exceeds the matrix size
    while pairs.len() < k {
        pairs.push((0.0, vec![0.0; n]));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dot_and_norm() {
        assert_eq!(dot(&[1.0, 2.0], &[3.0, 4.0]), 11.0);
        assert!((norm(&[3.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_column_means() {
        let m = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        assert_eq!(column_means(&m), vec![2.0, 3.0]);
    }

    #[test]
    fn test_center_columns_zeroes_means() {
        let m = vec![vec![1.0, 10.0], vec![3.0, 20.0]];
        let centered = center_columns(&m);
        let means = column_means(&centered);
        for v in means {
            assert!(v.abs() < 1e-6);
        }
    }

    #[test]
    fn test_gram_symmetry() {
        let m = vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]];
        let gram = scaled_gram(&m);
        for i in 0..3 {
            for j in 0..3 {
                assert!((gram[i][j] - gram[j][i]).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_top_eigenpair_of_diagonal() {
        // Diagonal matrix: eigenvalues are the diagonal entries
        let sym = vec![
            vec![4.0, 0.0, 0.0],
            vec![0.0, 2.0, 0.0],
            vec![0.0, 0.0, 1.0],
        ];
        let pairs = top_eigenpairs(&sym, 2);
        assert!((pairs[0].0 - 4.0).abs() < 1e-3);
        assert!((pairs[1].0 - 2.0).abs() < 1e-3);
        // Dominant eigenvector aligns with axis 0
        assert!(pairs[0].1[0].abs() > 0.99);
    }

    #[test]
    fn test_eigenvectors_are_orthogonal() {
        let sym = vec![
            vec![2.0, 1.0, 0.0],
            vec![1.0, 3.0, 1.0],
            vec![0.0, 1.0, 2.0],
        ];
        let pairs = top_eigenpairs(&sym, 2);
        let cross = dot(&pairs[0].1, &pairs[1].1);
        assert!(cross.abs() < 1e-3);
    }

    #[test]
    fn test_rank_deficient_pads_with_zeros() {
        // Rank-1 matrix: second eigenvector must be zero
        let sym = vec![vec![1.0, 1.0], vec![1.0, 1.0]];
        let pairs = top_eigenpairs(&sym, 3);
        assert!(pairs[0].0 > 1.9);
        assert_eq!(pairs[2].1, vec![0.0, 0.0]);
    }
}
