//! Dense eigenstructure of (possibly non-symmetric) flux Jacobians.

use crate::error::FluxError;
use crate::traits::EigenSystem;
use anyhow::Result;
use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

/// Relative tolerance under which two computed eigenvalues share a cluster.
const CLUSTER_TOL: f64 = 1e-8;
/// Remainder norm below which a vector counts as lying in a cluster's span.
const INDEPENDENCE_TOL: f64 = 1e-6;

/// Largest eigenvalue modulus of `matrix`.
pub fn spectral_radius(matrix: &DMatrix<f64>) -> f64 {
    if matrix.nrows() == 0 {
        return 0.0;
    }
    if matrix.nrows() == 1 {
        return matrix[(0, 0)].abs();
    }
    matrix
        .complex_eigenvalues()
        .iter()
        .map(|lambda| lambda.norm())
        .fold(0.0, f64::max)
}

/// Eigenvalues and right eigenvectors of a real square matrix.
///
/// Eigenvalues come from a real Schur decomposition. The eigenvector for
/// `lambda` is the right singular vector of `A - lambda I` belonging to the
/// smallest singular value.
///
/// Eigenvalues within `CLUSTER_TOL` of each other form a cluster. A later
/// member of a cluster looks at every singular vector of its shift that is
/// null up to the cluster width, orthogonalizes each against the vectors
/// already assigned to the cluster, and keeps the one with the largest
/// remainder. Diagonalizable matrices with repeated or nearly repeated
/// eigenvalues therefore get an independent basis. When the near-null space
/// is too small to hold the whole cluster (a defective matrix) the smallest
/// singular vector is kept as is and the eigenvector matrix comes out
/// singular.
///
/// Each eigenvalue costs one dense SVD, so the decomposition is `O(n⁴)` rather
/// than the `O(n³)` of a single eigendecomposition.
pub fn numerical_eigensystem(matrix: &DMatrix<f64>) -> Result<EigenSystem> {
    let dim = matrix.nrows();
    if matrix.ncols() != dim {
        return Err(FluxError::MatrixShape {
            what: "jacobian",
            expected: (dim, dim),
            got: matrix.shape(),
        }
        .into());
    }
    if dim == 0 {
        return Err(FluxError::EmptySystem.into());
    }
    if dim == 1 {
        return Ok(EigenSystem {
            values: DVector::from_element(1, Complex64::new(matrix[(0, 0)], 0.0)),
            vectors: DMatrix::from_element(1, 1, Complex64::new(1.0, 0.0)),
        });
    }

    let eigenvalues = matrix.complex_eigenvalues();
    let complex_matrix = matrix.map(|v| Complex64::new(v, 0.0));
    let null_tol = CLUSTER_TOL * matrix.norm().max(1.0);
    let mut vectors = DMatrix::<Complex64>::zeros(dim, dim);

    for idx in 0..dim {
        let lambda = eigenvalues[idx];
        let scale = CLUSTER_TOL * lambda.norm().max(1.0);
        let peers: Vec<usize> = (0..idx)
            .filter(|&j| (eigenvalues[j] - lambda).norm() <= scale)
            .collect();

        let mut shifted = complex_matrix.clone();
        for i in 0..dim {
            shifted[(i, i)] -= lambda;
        }

        let svd = SVD::new(shifted, false, true);
        let v_t = svd
            .v_t
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("SVD did not return right singular vectors for eigenvalue {idx}"))?;
        // Rows of V^H are conjugated right singular vectors, sorted by
        // decreasing singular value.
        let right = |row: usize| -> DVector<Complex64> { v_t.row(row).transpose().map(|c| c.conj()) };
        let last = v_t.nrows() - 1;
        let candidate = right(last);

        // Singular vectors of the shift that are null up to the cluster width.
        let near_null: Vec<usize> = (0..=last)
            .rev()
            .take_while(|&row| svd.singular_values[row] <= null_tol)
            .collect();

        let mut column = if peers.is_empty() || near_null.len() <= peers.len() {
            candidate
        } else {
            let basis = orthonormal_basis(&vectors, &peers);
            near_null
                .iter()
                .map(|&row| project_out(&right(row), &basis))
                .max_by(|a, b| a.norm().total_cmp(&b.norm()))
                .filter(|residual| residual.norm() >= INDEPENDENCE_TOL)
                .unwrap_or(candidate)
        };
        let norm = column.norm();
        if norm > 0.0 {
            column /= Complex64::new(norm, 0.0);
        }
        vectors.set_column(idx, &column);
    }

    Ok(EigenSystem {
        values: eigenvalues,
        vectors,
    })
}

/// Orthonormal basis of the span of the selected columns.
fn orthonormal_basis(vectors: &DMatrix<Complex64>, columns: &[usize]) -> Vec<DVector<Complex64>> {
    let mut basis: Vec<DVector<Complex64>> = Vec::with_capacity(columns.len());
    for &j in columns {
        let residual = project_out(&vectors.column(j).into_owned(), &basis);
        let norm = residual.norm();
        if norm > INDEPENDENCE_TOL {
            basis.push(residual / Complex64::new(norm, 0.0));
        }
    }
    basis
}

/// Part of `v` orthogonal to the orthonormal `basis` (modified Gram-Schmidt).
fn project_out(v: &DVector<Complex64>, basis: &[DVector<Complex64>]) -> DVector<Complex64> {
    let mut residual = v.clone();
    for q in basis {
        let projection = q.dotc(&residual);
        residual.axpy(-projection, q, Complex64::new(1.0, 0.0));
    }
    residual
}
