use crate::error::FluxError;
use crate::path::{
    a_integral_into, b_integral_into, validate_interface, wave_speed_bound_into, PathWorkspace,
};
use crate::quadrature::{QuadratureKind, QuadratureRule};
use crate::traits::HyperbolicModel;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which dissipation closes the interface jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FluxScheme {
    /// Scalar wave-speed bound times the jump.
    Rusanov,
    /// Path integral of the matrix absolute value of the Jacobian.
    #[default]
    OsherSolomon,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemeSettings {
    /// `N`; the path quadrature uses `N + 1` nodes.
    pub quadrature_order: usize,
    pub quadrature_kind: QuadratureKind,
    pub scheme: FluxScheme,
}

impl Default for SchemeSettings {
    fn default() -> Self {
        Self {
            quadrature_order: 2,
            quadrature_kind: QuadratureKind::GaussLegendre,
            scheme: FluxScheme::OsherSolomon,
        }
    }
}

impl SchemeSettings {
    pub fn validate(&self) -> Result<(), FluxError> {
        if self.quadrature_kind == QuadratureKind::GaussLobatto && self.quadrature_order == 0 {
            return Err(FluxError::Quadrature(
                "Gauss-Lobatto needs order of at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn build_rule(&self) -> Result<QuadratureRule, FluxError> {
        self.validate()?;
        QuadratureRule::new(self.quadrature_kind, self.quadrature_order)
    }
}

/// Side of the interface the owning cell sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Positive,
    Negative,
}

impl Orientation {
    pub fn from_pos(pos: bool) -> Self {
        if pos {
            Orientation::Positive
        } else {
            Orientation::Negative
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Orientation::Positive => 1.0,
            Orientation::Negative => -1.0,
        }
    }
}

/// The three ingredients of an interface jump, kept apart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JumpTerms {
    /// `F(qR) + F(qL)`.
    pub conservative: Vec<f64>,
    /// Path integral of the coupling matrix applied to the jump.
    pub coupling: Vec<f64>,
    /// Wave-speed bound or Osher-Solomon term; always subtracted.
    pub dissipation: Vec<f64>,
}

impl JumpTerms {
    /// `±(conservative + coupling) - dissipation`.
    ///
    /// Only the conservative and coupling parts flip with orientation; the
    /// dissipation is subtracted on both sides of the interface.
    pub fn assemble(&self, orientation: Orientation) -> Vec<f64> {
        let sign = orientation.sign();
        self.parts()
            .map(|((c, b), diss)| sign * c + sign * b - diss)
            .collect()
    }

    /// As [`Self::assemble`], writing into `out`, which must match the term length.
    pub fn assemble_into(&self, orientation: Orientation, out: &mut [f64]) -> Result<(), FluxError> {
        let n = self.conservative.len();
        if out.len() != n {
            return Err(FluxError::DimensionMismatch {
                side: "output",
                expected: n,
                got: out.len(),
            });
        }
        let sign = orientation.sign();
        for (value, ((c, b), diss)) in out.iter_mut().zip(self.parts()) {
            *value = sign * c + sign * b - diss;
        }
        Ok(())
    }

    fn parts(&self) -> impl Iterator<Item = ((&f64, &f64), &f64)> + '_ {
        self.conservative
            .iter()
            .zip(&self.coupling)
            .zip(&self.dissipation)
    }
}

/// Evaluates interface jump terms for one model with one shared quadrature rule.
///
/// The evaluator holds no mutable state: every call owns its scratch
/// buffers, so a single evaluator can serve many threads when `M: Sync`.
#[derive(Debug)]
pub struct JumpEvaluator<'m, M: ?Sized> {
    model: &'m M,
    rule: Arc<QuadratureRule>,
    scheme: FluxScheme,
}

impl<M: ?Sized> Clone for JumpEvaluator<'_, M> {
    fn clone(&self) -> Self {
        Self {
            model: self.model,
            rule: Arc::clone(&self.rule),
            scheme: self.scheme,
        }
    }
}

impl<'m, M> JumpEvaluator<'m, M>
where
    M: HyperbolicModel + ?Sized,
{
    /// Builds the quadrature rule described by `settings`.
    pub fn new(model: &'m M, settings: &SchemeSettings) -> Result<Self> {
        let rule = Arc::new(settings.build_rule()?);
        Ok(Self::with_rule(model, rule, settings.scheme))
    }

    /// Shares an already built rule, e.g. one table for several models.
    pub fn with_rule(model: &'m M, rule: Arc<QuadratureRule>, scheme: FluxScheme) -> Self {
        log::debug!(
            "jump evaluator: {:?}, n = {}, {} quadrature nodes",
            scheme,
            model.dimension(),
            rule.len()
        );
        Self {
            model,
            rule,
            scheme,
        }
    }

    pub fn model(&self) -> &'m M {
        self.model
    }

    pub fn rule(&self) -> &QuadratureRule {
        &self.rule
    }

    pub fn scheme(&self) -> FluxScheme {
        self.scheme
    }

    pub fn workspace(&self) -> PathWorkspace {
        PathWorkspace::new(self.model.dimension())
    }

    /// Coupling path integral, `Bint`.
    pub fn b_integral(&self, ql: &[f64], qr: &[f64], d: usize) -> Result<Vec<f64>> {
        let mut out = vec![0.0; self.model.dimension()];
        b_integral_into(self.model, &self.rule, ql, qr, d, &mut self.workspace(), &mut out)?;
        Ok(out)
    }

    /// Osher-Solomon dissipation, `Aint`.
    pub fn a_integral(&self, ql: &[f64], qr: &[f64], d: usize) -> Result<Vec<f64>> {
        let mut out = vec![0.0; self.model.dimension()];
        a_integral_into(self.model, &self.rule, ql, qr, d, &mut self.workspace(), &mut out)?;
        Ok(out)
    }

    /// Rusanov dissipation, `s_max`.
    pub fn wave_speed_bound(&self, ql: &[f64], qr: &[f64], d: usize) -> Result<Vec<f64>> {
        let mut out = vec![0.0; self.model.dimension()];
        wave_speed_bound_into(self.model, ql, qr, d, &mut out)?;
        Ok(out)
    }

    /// Evaluates every ingredient of the jump with the chosen dissipation.
    pub fn jump_terms(
        &self,
        ql: &[f64],
        qr: &[f64],
        d: usize,
        scheme: FluxScheme,
    ) -> Result<JumpTerms> {
        let mut ws = self.workspace();
        self.jump_terms_with(ql, qr, d, scheme, &mut ws)
    }

    /// As [`Self::jump_terms`], reusing caller-owned scratch buffers.
    pub fn jump_terms_with(
        &self,
        ql: &[f64],
        qr: &[f64],
        d: usize,
        scheme: FluxScheme,
        ws: &mut PathWorkspace,
    ) -> Result<JumpTerms> {
        validate_interface(self.model, ql, qr, d)?;
        log::trace!("{:?} jump in direction {}", scheme, d);
        let n = self.model.dimension();

        let mut conservative = vec![0.0; n];
        let mut left = vec![0.0; n];
        self.model.flux(qr, d, &mut conservative)?;
        self.model.flux(ql, d, &mut left)?;
        for (c, l) in conservative.iter_mut().zip(&left) {
            *c += l;
        }

        let mut coupling = vec![0.0; n];
        b_integral_into(self.model, &self.rule, ql, qr, d, ws, &mut coupling)?;

        let mut dissipation = vec![0.0; n];
        match scheme {
            FluxScheme::Rusanov => wave_speed_bound_into(self.model, ql, qr, d, &mut dissipation)?,
            FluxScheme::OsherSolomon => {
                a_integral_into(self.model, &self.rule, ql, qr, d, ws, &mut dissipation)?
            }
        }

        Ok(JumpTerms {
            conservative,
            coupling,
            dissipation,
        })
    }

    /// Rusanov jump term, `Drus`.
    pub fn rusanov(&self, ql: &[f64], qr: &[f64], d: usize, pos: bool) -> Result<Vec<f64>> {
        Ok(self
            .jump_terms(ql, qr, d, FluxScheme::Rusanov)?
            .assemble(Orientation::from_pos(pos)))
    }

    /// Osher-Solomon jump term, `Dos`.
    pub fn osher_solomon(&self, ql: &[f64], qr: &[f64], d: usize, pos: bool) -> Result<Vec<f64>> {
        Ok(self
            .jump_terms(ql, qr, d, FluxScheme::OsherSolomon)?
            .assemble(Orientation::from_pos(pos)))
    }

    /// Jump term with the evaluator's configured scheme.
    pub fn jump(&self, ql: &[f64], qr: &[f64], d: usize, pos: bool) -> Result<Vec<f64>> {
        Ok(self
            .jump_terms(ql, qr, d, self.scheme)?
            .assemble(Orientation::from_pos(pos)))
    }
}
