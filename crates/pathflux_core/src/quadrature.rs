//! Quadrature rules on the unit interval used for path integrals.

use crate::error::FluxError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const NEWTON_MAX_ITERS: usize = 100;
const NEWTON_TOL: f64 = 1e-14;
const WEIGHT_SUM_TOL: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuadratureKind {
    /// Interior points, exact for polynomials of degree `2N + 1`.
    #[default]
    GaussLegendre,
    /// Includes both path endpoints, exact for degree `2N - 1`.
    GaussLobatto,
}

/// An immutable table of `N + 1` nodes in `[0, 1]` with weights summing to one,
/// approximating `∫₀¹ f(s) ds ≈ Σ wᵢ f(xᵢ)`.
///
/// Build it once and share it (e.g. behind an `Arc`); nothing mutates it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuadratureRule {
    kind: Option<QuadratureKind>,
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl QuadratureRule {
    /// Builds the `order + 1` point rule of the given family.
    pub fn new(kind: QuadratureKind, order: usize) -> Result<Self, FluxError> {
        let points = order + 1;
        let (nodes, weights) = match kind {
            QuadratureKind::GaussLegendre => gauss_legendre(points)?,
            QuadratureKind::GaussLobatto => gauss_lobatto(points)?,
        };
        log::debug!(
            "built {:?} quadrature with {} nodes (order {})",
            kind,
            nodes.len(),
            order
        );
        Ok(Self {
            kind: Some(kind),
            nodes,
            weights,
        })
    }

    pub fn gauss_legendre(order: usize) -> Result<Self, FluxError> {
        Self::new(QuadratureKind::GaussLegendre, order)
    }

    /// Wraps a caller-supplied table after checking it is a valid rule on `[0, 1]`.
    pub fn from_parts(nodes: Vec<f64>, weights: Vec<f64>) -> Result<Self, FluxError> {
        if nodes.is_empty() {
            return Err(FluxError::Quadrature("rule needs at least one node".into()));
        }
        if nodes.len() != weights.len() {
            return Err(FluxError::Quadrature(format!(
                "{} nodes but {} weights",
                nodes.len(),
                weights.len()
            )));
        }
        if nodes.iter().any(|x| !x.is_finite() || !(0.0..=1.0).contains(x)) {
            return Err(FluxError::Quadrature("nodes must lie in [0, 1]".into()));
        }
        if nodes.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(FluxError::Quadrature("nodes must be ascending".into()));
        }
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(FluxError::Quadrature("weights must be finite".into()));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > WEIGHT_SUM_TOL {
            return Err(FluxError::Quadrature(format!(
                "weights sum to {total}, expected 1"
            )));
        }
        Ok(Self {
            kind: None,
            nodes,
            weights,
        })
    }

    pub fn nodes(&self) -> &[f64] {
        &self.nodes
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of points, `N + 1`.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The order `N` of the rule.
    pub fn order(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Rule family, or `None` for a table supplied through `from_parts`.
    pub fn kind(&self) -> Option<QuadratureKind> {
        self.kind
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.nodes.iter().copied().zip(self.weights.iter().copied())
    }

    pub fn integrate(&self, f: impl Fn(f64) -> f64) -> f64 {
        self.iter().map(|(x, w)| w * f(x)).sum()
    }
}

/// Gauss-Legendre nodes and weights, mapped from `[-1, 1]` to `[0, 1]`.
fn gauss_legendre(points: usize) -> Result<(Vec<f64>, Vec<f64>), FluxError> {
    let n = points;
    let mut pairs = Vec::with_capacity(n);
    for i in 0..(n + 1) / 2 {
        let mut x = f64::cos(PI * (i as f64 + 0.75) / (n as f64 + 0.5));
        let mut converged = false;
        for _ in 0..NEWTON_MAX_ITERS {
            let (p, dp) = legendre_eval(n, x);
            let dx = -p / dp;
            x += dx;
            if dx.abs() < NEWTON_TOL {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(FluxError::Quadrature(format!(
                "Newton iteration for Gauss-Legendre node {i} of {n} did not converge"
            )));
        }
        let (_, dp) = legendre_eval(n, x);
        // Half of the [-1, 1] weight, since the interval length halves.
        let w = 1.0 / ((1.0 - x * x) * dp * dp);
        pairs.push((0.5 * (1.0 - x), w));
        if 2 * i + 1 != n {
            pairs.push((0.5 * (1.0 + x), w));
        }
    }
    Ok(sorted(pairs))
}

/// Gauss-Lobatto nodes (endpoints plus roots of `P'_{N}`), mapped to `[0, 1]`.
fn gauss_lobatto(points: usize) -> Result<(Vec<f64>, Vec<f64>), FluxError> {
    if points < 2 {
        return Err(FluxError::Quadrature(
            "Gauss-Lobatto needs order of at least 1".into(),
        ));
    }
    let n = points - 1;
    let nn1 = (n * (n + 1)) as f64;
    let weight = |x: f64| {
        let (p, _) = legendre_eval(n, x);
        1.0 / (nn1 * p * p)
    };

    let mut pairs = vec![(0.0, weight(-1.0)), (1.0, weight(1.0))];
    for j in 1..n {
        let mut x = -(PI * j as f64 / n as f64).cos();
        let mut converged = false;
        for _ in 0..NEWTON_MAX_ITERS {
            let (p, dp) = legendre_eval(n, x);
            // Newton on (1 - x^2) P'_N, whose derivative is -N(N+1) P_N.
            let update = (1.0 - x * x) * dp / (nn1 * p);
            x += update;
            if update.abs() < NEWTON_TOL {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(FluxError::Quadrature(format!(
                "Newton iteration for Gauss-Lobatto node {j} of {n} did not converge"
            )));
        }
        pairs.push((0.5 * (x + 1.0), weight(x)));
    }
    Ok(sorted(pairs))
}

fn sorted(mut pairs: Vec<(f64, f64)>) -> (Vec<f64>, Vec<f64>) {
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    pairs.into_iter().unzip()
}

/// `(P_n(x), P_n'(x))` by the three-term recurrence.
fn legendre_eval(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p0 = 1.0;
    let mut p1 = x;
    let mut dp0 = 0.0;
    let mut dp1 = 1.0;
    for k in 2..=n {
        let kf = k as f64;
        let pn = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
        // P_k' = P_{k-2}' + (2k - 1) P_{k-1}, valid at the endpoints too.
        let dpn = dp0 + (2.0 * kf - 1.0) * p1;
        p0 = p1;
        p1 = pn;
        dp0 = dp1;
        dp1 = dpn;
    }
    (p1, dp1)
}
