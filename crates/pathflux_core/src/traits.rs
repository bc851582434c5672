use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

use crate::eigen::spectral_radius;

/// A trait for types the equation engine can evaluate over.
/// Implemented for `f64` and for the `Dual` numbers used to differentiate fluxes.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Eigenvalues and right eigenvectors (as columns) of a flux Jacobian.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenSystem {
    pub values: DVector<Complex64>,
    pub vectors: DMatrix<Complex64>,
}

/// The physical model of a system of hyperbolic balance laws
/// `q_t + F(q)_x + B(q) q_x = 0`, evaluated one direction at a time.
///
/// All matrices are `n x n` with `n = dimension()`; the caller always hands
/// in buffers of the right size and states of length `n`, and guarantees
/// `d < directions()`.
pub trait HyperbolicModel {
    /// Number of state variables `n`.
    fn dimension(&self) -> usize;

    /// Number of spatial directions the model can be evaluated in.
    fn directions(&self) -> usize;

    /// Physical flux `F_d(q)`.
    fn flux(&self, q: &[f64], d: usize, out: &mut [f64]) -> Result<()>;

    /// Flux Jacobian `dF_d/dq`.
    fn jacobian(&self, q: &[f64], d: usize, out: &mut DMatrix<f64>) -> Result<()>;

    /// Non-conservative coupling matrix `B_d(q)`.
    fn block(&self, q: &[f64], d: usize, out: &mut DMatrix<f64>) -> Result<()>;

    /// Upper bound on the absolute characteristic speeds at `q`.
    ///
    /// Defaults to the spectral radius of the numerically evaluated Jacobian.
    fn max_abs_eig(&self, q: &[f64], d: usize) -> Result<f64> {
        let n = self.dimension();
        let mut jacobian = DMatrix::zeros(n, n);
        self.jacobian(q, d, &mut jacobian)?;
        Ok(spectral_radius(&jacobian))
    }

    /// Closed-form eigenstructure of the Jacobian, if the model knows it.
    ///
    /// Returning `Ok(None)` makes the Osher-Solomon integral fall back to a
    /// dense numerical eigensolver.
    fn eigensystem(&self, _q: &[f64], _d: usize) -> Result<Option<EigenSystem>> {
        Ok(None)
    }

    /// Whether the model has a non-conservative part at all.
    /// When `false`, the coupling integral is zero and `block` is never called.
    fn has_block(&self) -> bool {
        true
    }
}
