//! Path integrals along the straight segment `q(s) = qL + s (qR - qL)`.
//!
//! These are the building blocks of the interface jump terms:
//!
//! - [`b_integral_into`]: `(∫₀¹ B(q(s)) ds) (qR - qL)`, the non-conservative
//!   product across the interface.
//! - [`a_integral_into`]: `(∫₀¹ |J(q(s))| ds) (qR - qL)`, the Osher-Solomon
//!   dissipation, with `|J| = R |Λ| R⁻¹` taken node by node.
//! - [`wave_speed_bound_into`]: `max(ρ(qL), ρ(qR)) (qR - qL)`, the Rusanov
//!   dissipation.
//!
//! Every function validates its inputs before touching the model, and passes
//! model errors through unchanged.

use crate::eigen::numerical_eigensystem;
use crate::error::FluxError;
use crate::quadrature::QuadratureRule;
use crate::traits::{EigenSystem, HyperbolicModel};
use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

/// Scratch buffers for one interface evaluation, sized for `n` state variables.
///
/// Reusing a workspace across calls keeps the per-node loops allocation free.
#[derive(Debug, Clone)]
pub struct PathWorkspace {
    dim: usize,
    jump: DVector<f64>,
    point: Vec<f64>,
    matrix: DMatrix<f64>,
    accum: DMatrix<f64>,
    product: DVector<f64>,
    complex_jump: DVector<Complex64>,
    complex_accum: DVector<Complex64>,
}

impl PathWorkspace {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            jump: DVector::zeros(dim),
            point: vec![0.0; dim],
            matrix: DMatrix::zeros(dim, dim),
            accum: DMatrix::zeros(dim, dim),
            product: DVector::zeros(dim),
            complex_jump: DVector::zeros(dim),
            complex_accum: DVector::zeros(dim),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    fn load_jump(&mut self, ql: &[f64], qr: &[f64]) {
        for i in 0..self.dim {
            self.jump[i] = qr[i] - ql[i];
        }
    }

    fn load_point(&mut self, ql: &[f64], s: f64) {
        for i in 0..self.dim {
            self.point[i] = ql[i] + s * self.jump[i];
        }
    }
}

/// Fails fast on malformed interface input.
pub fn validate_interface<M>(model: &M, ql: &[f64], qr: &[f64], d: usize) -> Result<()>
where
    M: HyperbolicModel + ?Sized,
{
    let n = model.dimension();
    if n == 0 {
        return Err(FluxError::EmptySystem.into());
    }
    for (side, q) in [("left", ql), ("right", qr)] {
        if q.len() != n {
            return Err(FluxError::DimensionMismatch {
                side,
                expected: n,
                got: q.len(),
            }
            .into());
        }
    }
    let directions = model.directions();
    if d >= directions {
        return Err(FluxError::DirectionOutOfRange {
            direction: d,
            directions,
        }
        .into());
    }
    Ok(())
}

fn check_output(ws: &PathWorkspace, out: &[f64], n: usize) -> Result<()> {
    if ws.dim != n {
        return Err(FluxError::DimensionMismatch {
            side: "workspace",
            expected: n,
            got: ws.dim,
        }
        .into());
    }
    if out.len() != n {
        return Err(FluxError::DimensionMismatch {
            side: "output",
            expected: n,
            got: out.len(),
        }
        .into());
    }
    Ok(())
}

fn check_square(what: &'static str, matrix: &DMatrix<f64>, n: usize) -> Result<()> {
    if matrix.shape() != (n, n) {
        return Err(FluxError::MatrixShape {
            what,
            expected: (n, n),
            got: matrix.shape(),
        }
        .into());
    }
    Ok(())
}

/// Writes `(Σᵢ wᵢ B(q(xᵢ), d)) (qR - qL)` into `out`.
pub fn b_integral_into<M>(
    model: &M,
    rule: &QuadratureRule,
    ql: &[f64],
    qr: &[f64],
    d: usize,
    ws: &mut PathWorkspace,
    out: &mut [f64],
) -> Result<()>
where
    M: HyperbolicModel + ?Sized,
{
    validate_interface(model, ql, qr, d)?;
    let n = model.dimension();
    check_output(ws, out, n)?;

    if !model.has_block() {
        out.fill(0.0);
        return Ok(());
    }

    ws.load_jump(ql, qr);
    ws.accum.fill(0.0);
    for (x, w) in rule.iter() {
        ws.load_point(ql, x);
        model.block(&ws.point, d, &mut ws.matrix)?;
        check_square("coupling matrix", &ws.matrix, n)?;
        ws.accum.zip_apply(&ws.matrix, |acc, b| *acc += w * b);
    }

    ws.product.gemv(1.0, &ws.accum, &ws.jump, 0.0);
    out.copy_from_slice(ws.product.as_slice());
    Ok(())
}

/// Writes the real part of `Σᵢ wᵢ R |Λ| R⁻¹ (qR - qL)` into `out`, with
/// `J(q(xᵢ), d) = R Λ R⁻¹` decomposed at every node.
///
/// The eigenbasis comes from [`HyperbolicModel::eigensystem`] when the model
/// provides one, otherwise from a dense numerical eigensolver. An exactly
/// singular eigenvector matrix is an error; a merely ill-conditioned one
/// (near-defective Jacobian) is not detected and yields an inaccurate result.
pub fn a_integral_into<M>(
    model: &M,
    rule: &QuadratureRule,
    ql: &[f64],
    qr: &[f64],
    d: usize,
    ws: &mut PathWorkspace,
    out: &mut [f64],
) -> Result<()>
where
    M: HyperbolicModel + ?Sized,
{
    validate_interface(model, ql, qr, d)?;
    let n = model.dimension();
    check_output(ws, out, n)?;

    ws.load_jump(ql, qr);
    for i in 0..n {
        ws.complex_jump[i] = Complex64::new(ws.jump[i], 0.0);
    }
    ws.complex_accum.fill(Complex64::new(0.0, 0.0));

    for (node, (x, w)) in rule.iter().enumerate() {
        ws.load_point(ql, x);
        let system = match model.eigensystem(&ws.point, d)? {
            Some(system) => {
                check_eigensystem(&system, n)?;
                system
            }
            None => {
                model.jacobian(&ws.point, d, &mut ws.matrix)?;
                check_square("jacobian", &ws.matrix, n)?;
                numerical_eigensystem(&ws.matrix)?
            }
        };

        let coefficients = match system.vectors.clone().lu().solve(&ws.complex_jump) {
            Some(b) => b,
            None => {
                log::warn!(
                    "eigenvector matrix singular at node {node} (s = {x}), direction {d}"
                );
                return Err(FluxError::SingularEigenbasis { node }.into());
            }
        };
        let scaled = coefficients.zip_map(&system.values, |b, lambda| b * lambda.norm());
        ws.complex_accum
            .gemv(Complex64::new(w, 0.0), &system.vectors, &scaled, Complex64::new(1.0, 0.0));
    }

    for i in 0..n {
        out[i] = ws.complex_accum[i].re;
    }
    Ok(())
}

fn check_eigensystem(system: &EigenSystem, n: usize) -> Result<()> {
    if system.values.len() != n {
        return Err(FluxError::MatrixShape {
            what: "eigenvalue vector",
            expected: (n, 1),
            got: (system.values.len(), 1),
        }
        .into());
    }
    if system.vectors.shape() != (n, n) {
        return Err(FluxError::MatrixShape {
            what: "eigenvector matrix",
            expected: (n, n),
            got: system.vectors.shape(),
        }
        .into());
    }
    Ok(())
}

/// Writes `max(ρ(qL, d), ρ(qR, d)) (qR - qL)` into `out`.
pub fn wave_speed_bound_into<M>(
    model: &M,
    ql: &[f64],
    qr: &[f64],
    d: usize,
    out: &mut [f64],
) -> Result<()>
where
    M: HyperbolicModel + ?Sized,
{
    validate_interface(model, ql, qr, d)?;
    let n = model.dimension();
    if out.len() != n {
        return Err(FluxError::DimensionMismatch {
            side: "output",
            expected: n,
            got: out.len(),
        }
        .into());
    }

    let speed = model.max_abs_eig(ql, d)?.max(model.max_abs_eig(qr, d)?);
    for i in 0..n {
        out[i] = speed * (qr[i] - ql[i]);
    }
    Ok(())
}

/// Allocating form of [`b_integral_into`].
pub fn b_integral<M>(model: &M, rule: &QuadratureRule, ql: &[f64], qr: &[f64], d: usize) -> Result<Vec<f64>>
where
    M: HyperbolicModel + ?Sized,
{
    let n = model.dimension();
    let mut out = vec![0.0; n];
    b_integral_into(model, rule, ql, qr, d, &mut PathWorkspace::new(n), &mut out)?;
    Ok(out)
}

/// Allocating form of [`a_integral_into`].
pub fn a_integral<M>(model: &M, rule: &QuadratureRule, ql: &[f64], qr: &[f64], d: usize) -> Result<Vec<f64>>
where
    M: HyperbolicModel + ?Sized,
{
    let n = model.dimension();
    let mut out = vec![0.0; n];
    a_integral_into(model, rule, ql, qr, d, &mut PathWorkspace::new(n), &mut out)?;
    Ok(out)
}

/// Allocating form of [`wave_speed_bound_into`].
pub fn wave_speed_bound<M>(model: &M, ql: &[f64], qr: &[f64], d: usize) -> Result<Vec<f64>>
where
    M: HyperbolicModel + ?Sized,
{
    let mut out = vec![0.0; model.dimension()];
    wave_speed_bound_into(model, ql, qr, d, &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    /// 2x2 linear system with constant Jacobian and a state-dependent block.
    struct Linear {
        a: DMatrix<f64>,
    }

    impl HyperbolicModel for Linear {
        fn dimension(&self) -> usize {
            2
        }
        fn directions(&self) -> usize {
            1
        }
        fn flux(&self, q: &[f64], _d: usize, out: &mut [f64]) -> Result<()> {
            let f = &self.a * DVector::from_column_slice(q);
            out.copy_from_slice(f.as_slice());
            Ok(())
        }
        fn jacobian(&self, _q: &[f64], _d: usize, out: &mut DMatrix<f64>) -> Result<()> {
            out.copy_from(&self.a);
            Ok(())
        }
        fn block(&self, q: &[f64], _d: usize, out: &mut DMatrix<f64>) -> Result<()> {
            // B(q) = [[q0, 0], [0, 0]]: linear in the path parameter.
            out.fill(0.0);
            out[(0, 0)] = q[0];
            Ok(())
        }
    }

    fn assert_err_contains<T: std::fmt::Debug>(result: Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    fn model() -> Linear {
        Linear {
            a: DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 4.0, 0.0]),
        }
    }

    #[test]
    fn b_integral_of_linear_block_uses_path_average() {
        let rule = QuadratureRule::gauss_legendre(1).expect("rule");
        let (ql, qr) = ([1.0, 0.0], [3.0, 2.0]);
        let out = b_integral(&model(), &rule, &ql, &qr, 0).expect("b integral");
        // ∫ q0(s) ds = 2, so the first component is 2 * (3 - 1).
        assert!((out[0] - 4.0).abs() < 1e-13);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn a_integral_of_constant_jacobian_is_matrix_absolute_value() {
        // Eigenvalues +-2; |A| = 2 I for this A.
        let rule = QuadratureRule::gauss_legendre(2).expect("rule");
        let (ql, qr) = ([0.0, 0.0], [1.0, -0.5]);
        let out = a_integral(&model(), &rule, &ql, &qr, 0).expect("a integral");
        assert!((out[0] - 2.0).abs() < 1e-10);
        assert!((out[1] + 1.0).abs() < 1e-10);
    }

    #[test]
    fn a_integral_resolves_nearly_equal_speeds() {
        let rule = QuadratureRule::gauss_legendre(2).expect("rule");
        let close = Linear {
            a: DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0 + 5e-9]),
        };
        let out = a_integral(&close, &rule, &[0.0, 0.0], &[1.0, 1.0], 0).expect("a integral");
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert!((out[1] - 1.000000005).abs() < 1e-12);
    }

    #[test]
    fn b_integral_applies_full_averaged_block() {
        struct Coupled;
        impl HyperbolicModel for Coupled {
            fn dimension(&self) -> usize {
                2
            }
            fn directions(&self) -> usize {
                1
            }
            fn flux(&self, _q: &[f64], _d: usize, out: &mut [f64]) -> Result<()> {
                out.fill(0.0);
                Ok(())
            }
            fn jacobian(&self, _q: &[f64], _d: usize, out: &mut DMatrix<f64>) -> Result<()> {
                out.fill(0.0);
                Ok(())
            }
            fn block(&self, q: &[f64], _d: usize, out: &mut DMatrix<f64>) -> Result<()> {
                out.copy_from_slice(&[1.0, q[1], 2.0, -1.0]);
                Ok(())
            }
        }

        // Column-major [[1, 2], [q1, -1]]; q1 averages to 1 along the path.
        let rule = QuadratureRule::gauss_legendre(1).expect("rule");
        let out = b_integral(&Coupled, &rule, &[0.0, 0.0], &[1.0, 2.0], 0).expect("b integral");
        assert!((out[0] - 5.0).abs() < 1e-13);
        assert!((out[1] + 1.0).abs() < 1e-13);
    }

    #[test]
    fn wave_speed_bound_uses_default_spectral_radius() {
        let out = wave_speed_bound(&model(), &[0.0, 0.0], &[1.0, 2.0], 0).expect("bound");
        assert!((out[0] - 2.0).abs() < 1e-12);
        assert!((out[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn workspace_is_reusable_across_interfaces() {
        let m = model();
        let rule = QuadratureRule::gauss_legendre(1).expect("rule");
        let mut ws = PathWorkspace::new(2);
        let mut first = [0.0; 2];
        let mut second = [0.0; 2];
        b_integral_into(&m, &rule, &[1.0, 0.0], &[3.0, 2.0], 0, &mut ws, &mut first).expect("first");
        b_integral_into(&m, &rule, &[1.0, 0.0], &[3.0, 2.0], 0, &mut ws, &mut second).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_malformed_input_before_calling_model() {
        let rule = QuadratureRule::gauss_legendre(1).expect("rule");
        assert_err_contains(
            b_integral(&model(), &rule, &[1.0], &[1.0, 2.0], 0),
            "left state has length 1, expected 2",
        );
        assert_err_contains(
            a_integral(&model(), &rule, &[1.0, 2.0], &[1.0, 2.0, 3.0], 0),
            "right state has length 3",
        );
        let err = wave_speed_bound(&model(), &[1.0, 2.0], &[1.0, 2.0], 1).expect_err("bad direction");
        assert_eq!(
            err.downcast_ref::<FluxError>(),
            Some(&FluxError::DirectionOutOfRange {
                direction: 1,
                directions: 1
            })
        );
    }

    #[test]
    fn rejects_mismatched_workspace() {
        let rule = QuadratureRule::gauss_legendre(1).expect("rule");
        let mut ws = PathWorkspace::new(3);
        let mut out = [0.0; 2];
        assert_err_contains(
            b_integral_into(&model(), &rule, &[0.0; 2], &[1.0; 2], 0, &mut ws, &mut out),
            "workspace state has length 3",
        );
    }

    struct Defective;

    impl HyperbolicModel for Defective {
        fn dimension(&self) -> usize {
            2
        }
        fn directions(&self) -> usize {
            1
        }
        fn flux(&self, _q: &[f64], _d: usize, _out: &mut [f64]) -> Result<()> {
            bail!("flux is not needed here")
        }
        fn jacobian(&self, _q: &[f64], _d: usize, out: &mut DMatrix<f64>) -> Result<()> {
            out.copy_from_slice(&[1.0, 0.0, 1.0, 1.0]);
            Ok(())
        }
        fn block(&self, _q: &[f64], _d: usize, _out: &mut DMatrix<f64>) -> Result<()> {
            bail!("block unavailable")
        }
        fn eigensystem(&self, _q: &[f64], _d: usize) -> Result<Option<EigenSystem>> {
            // A Jordan block: both eigenvectors collapse onto e0.
            let one = Complex64::new(1.0, 0.0);
            let zero = Complex64::new(0.0, 0.0);
            Ok(Some(EigenSystem {
                values: DVector::from_element(2, one),
                vectors: DMatrix::from_row_slice(2, 2, &[one, one, zero, zero]),
            }))
        }
    }

    #[test]
    fn singular_eigenbasis_is_reported_with_node() {
        let rule = QuadratureRule::gauss_legendre(0).expect("rule");
        let err = a_integral(&Defective, &rule, &[0.0, 0.0], &[1.0, 1.0], 0).expect_err("singular");
        assert_eq!(
            err.downcast_ref::<FluxError>(),
            Some(&FluxError::SingularEigenbasis { node: 0 })
        );
    }

    #[test]
    fn model_errors_pass_through_unchanged() {
        let rule = QuadratureRule::gauss_legendre(0).expect("rule");
        let err = b_integral(&Defective, &rule, &[0.0, 0.0], &[1.0, 1.0], 0).expect_err("block fails");
        assert_eq!(err.to_string(), "block unavailable");
        assert!(err.downcast_ref::<FluxError>().is_none());
    }
}
