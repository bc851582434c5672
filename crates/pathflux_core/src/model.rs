//! A `HyperbolicModel` assembled from user-written expressions.

use crate::autodiff::{dual_jacobian, Dual};
use crate::eigen::spectral_radius;
use crate::equation_engine::{Bytecode, Compiler};
use crate::error::FluxError;
use crate::traits::HyperbolicModel;
use anyhow::Result;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Source expressions for one spatial direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DirectionExpressions {
    /// One flux component per state variable.
    pub flux: Vec<String>,
    /// `n * n` coupling entries in row-major order; absent means `B = 0`.
    #[serde(default)]
    pub block: Option<Vec<String>>,
    /// Bound on the absolute wave speed; absent means the Jacobian's spectral radius.
    #[serde(default)]
    pub wave_speed: Option<String>,
}

#[derive(Debug, Clone)]
struct CompiledDirection {
    flux: Vec<Bytecode>,
    block: Option<Vec<Bytecode>>,
    wave_speed: Option<Bytecode>,
}

/// Fluxes, coupling matrices and wave speeds compiled from strings.
/// The Jacobian comes from differentiating the flux expressions with dual numbers.
///
/// Holds no interior mutability, so it is `Send + Sync`.
#[derive(Debug, Clone)]
pub struct ExpressionModel {
    var_names: Vec<String>,
    params: Vec<f64>,
    dual_params: Vec<Dual>,
    directions: Vec<CompiledDirection>,
    stack_depth: usize,
}

impl ExpressionModel {
    pub fn new(
        var_names: &[String],
        param_names: &[String],
        params: Vec<f64>,
        directions: &[DirectionExpressions],
    ) -> Result<Self> {
        let n = var_names.len();
        if n == 0 {
            return Err(FluxError::EmptySystem.into());
        }
        if directions.is_empty() {
            return Err(FluxError::Expression("model needs at least one direction".into()).into());
        }
        if params.len() != param_names.len() {
            return Err(FluxError::Expression(format!(
                "{} parameter names but {} values",
                param_names.len(),
                params.len()
            ))
            .into());
        }

        let compiler = Compiler::new(var_names, param_names);
        let compile_all = |sources: &[String]| -> Result<Vec<Bytecode>, FluxError> {
            sources.iter().map(|s| compiler.compile_str(s)).collect()
        };

        let mut compiled = Vec::with_capacity(directions.len());
        for (d, exprs) in directions.iter().enumerate() {
            if exprs.flux.len() != n {
                return Err(FluxError::Expression(format!(
                    "direction {d}: {} flux expressions for {n} variables",
                    exprs.flux.len()
                ))
                .into());
            }
            let block = match &exprs.block {
                Some(entries) if entries.len() != n * n => {
                    return Err(FluxError::Expression(format!(
                        "direction {d}: {} block entries, expected {}",
                        entries.len(),
                        n * n
                    ))
                    .into());
                }
                Some(entries) => Some(compile_all(entries)?),
                None => None,
            };
            compiled.push(CompiledDirection {
                flux: compile_all(&exprs.flux)?,
                block,
                wave_speed: exprs
                    .wave_speed
                    .as_deref()
                    .map(|s| compiler.compile_str(s))
                    .transpose()?,
            });
        }

        let stack_depth = compiled
            .iter()
            .flat_map(|c| {
                c.flux
                    .iter()
                    .chain(c.block.iter().flatten())
                    .chain(c.wave_speed.iter())
            })
            .map(Bytecode::max_depth)
            .max()
            .unwrap_or(0);

        log::debug!(
            "compiled expression model: {} variables, {} directions",
            n,
            compiled.len()
        );

        Ok(Self {
            var_names: var_names.to_vec(),
            dual_params: params.iter().map(|&p| Dual::constant(p)).collect(),
            params,
            directions: compiled,
            stack_depth,
        })
    }

    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    pub fn params(&self) -> &[f64] {
        &self.params
    }

    fn direction(&self, d: usize) -> Result<&CompiledDirection, FluxError> {
        self.directions
            .get(d)
            .ok_or(FluxError::DirectionOutOfRange {
                direction: d,
                directions: self.directions.len(),
            })
    }
}

impl HyperbolicModel for ExpressionModel {
    fn dimension(&self) -> usize {
        self.var_names.len()
    }

    fn directions(&self) -> usize {
        self.directions.len()
    }

    fn flux(&self, q: &[f64], d: usize, out: &mut [f64]) -> Result<()> {
        let direction = self.direction(d)?;
        let mut stack = Vec::with_capacity(self.stack_depth);
        for (value, code) in out.iter_mut().zip(&direction.flux) {
            *value = code.eval(q, &self.params, &mut stack);
        }
        Ok(())
    }

    fn jacobian(&self, q: &[f64], d: usize, out: &mut DMatrix<f64>) -> Result<()> {
        let direction = self.direction(d)?;
        let mut stack = Vec::with_capacity(self.stack_depth);
        dual_jacobian(q, out, |x, fx| {
            for (value, code) in fx.iter_mut().zip(&direction.flux) {
                *value = code.eval(x, &self.dual_params, &mut stack);
            }
            Ok(())
        })
    }

    fn block(&self, q: &[f64], d: usize, out: &mut DMatrix<f64>) -> Result<()> {
        let direction = self.direction(d)?;
        let Some(entries) = &direction.block else {
            out.fill(0.0);
            return Ok(());
        };
        let n = self.dimension();
        let mut stack = Vec::with_capacity(self.stack_depth);
        for (k, code) in entries.iter().enumerate() {
            out[(k / n, k % n)] = code.eval(q, &self.params, &mut stack);
        }
        Ok(())
    }

    fn max_abs_eig(&self, q: &[f64], d: usize) -> Result<f64> {
        let direction = self.direction(d)?;
        if let Some(code) = &direction.wave_speed {
            let mut stack = Vec::with_capacity(self.stack_depth);
            return Ok(code.eval(q, &self.params, &mut stack).abs());
        }
        let n = self.dimension();
        let mut jacobian = DMatrix::zeros(n, n);
        self.jacobian(q, d, &mut jacobian)?;
        Ok(spectral_radius(&jacobian))
    }

    fn has_block(&self) -> bool {
        self.directions.iter().any(|d| d.block.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn shallow_water() -> ExpressionModel {
        ExpressionModel::new(
            &strings(&["h", "hu"]),
            &strings(&["g"]),
            vec![9.81],
            &[DirectionExpressions {
                flux: strings(&["hu", "hu^2/h + 0.5*g*h^2"]),
                block: None,
                wave_speed: None,
            }],
        )
        .expect("model should compile")
    }

    #[test]
    fn flux_and_jacobian_of_shallow_water() {
        let model = shallow_water();
        let q = [2.0, 1.0];
        let mut flux = [0.0; 2];
        model.flux(&q, 0, &mut flux).expect("flux");
        assert!((flux[0] - 1.0).abs() < 1e-12);
        assert!((flux[1] - (0.5 + 0.5 * 9.81 * 4.0)).abs() < 1e-12);

        let mut jac = DMatrix::zeros(2, 2);
        model.jacobian(&q, 0, &mut jac).expect("jacobian");
        let u = 0.5;
        let expected = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 9.81 * 2.0 - u * u, 2.0 * u]);
        assert!((jac - expected).norm() < 1e-12);
    }

    #[test]
    fn default_wave_speed_is_spectral_radius() {
        let model = shallow_water();
        let speed = model.max_abs_eig(&[2.0, 1.0], 0).expect("speed");
        assert!((speed - (0.5 + (9.81_f64 * 2.0).sqrt())).abs() < 1e-10);
    }

    #[test]
    fn explicit_wave_speed_takes_absolute_value() {
        let model = ExpressionModel::new(
            &strings(&["q"]),
            &[],
            Vec::new(),
            &[DirectionExpressions {
                flux: strings(&["0.5*q^2"]),
                block: None,
                wave_speed: Some("q".into()),
            }],
        )
        .expect("model");
        assert_eq!(model.max_abs_eig(&[-3.0], 0).expect("speed"), 3.0);
        assert!(!model.has_block());
    }

    #[test]
    fn block_is_filled_row_major() {
        let model = ExpressionModel::new(
            &strings(&["a", "b"]),
            &[],
            Vec::new(),
            &[DirectionExpressions {
                flux: strings(&["0", "0"]),
                block: Some(strings(&["1", "a", "b", "a*b"])),
                wave_speed: None,
            }],
        )
        .expect("model");
        let mut block = DMatrix::zeros(2, 2);
        model.block(&[2.0, 3.0], 0, &mut block).expect("block");
        assert_eq!(block, DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 6.0]));
        assert!(model.has_block());
    }

    #[test]
    fn rejects_inconsistent_definitions() {
        let err = ExpressionModel::new(
            &strings(&["a", "b"]),
            &[],
            Vec::new(),
            &[DirectionExpressions {
                flux: strings(&["a"]),
                ..Default::default()
            }],
        )
        .expect_err("too few flux expressions");
        assert!(err.to_string().contains("1 flux expressions for 2 variables"));

        let err = ExpressionModel::new(
            &strings(&["a"]),
            &strings(&["k"]),
            Vec::new(),
            &[DirectionExpressions {
                flux: strings(&["k*a"]),
                ..Default::default()
            }],
        )
        .expect_err("missing parameter value");
        assert!(err.to_string().contains("1 parameter names but 0 values"));

        let err = ExpressionModel::new(
            &strings(&["a"]),
            &[],
            Vec::new(),
            &[DirectionExpressions {
                flux: strings(&["a * c"]),
                ..Default::default()
            }],
        )
        .expect_err("unknown symbol");
        assert!(matches!(
            err.downcast_ref::<FluxError>(),
            Some(FluxError::Expression(_))
        ));
    }

    #[test]
    fn model_is_shareable_across_threads() {
        fn assert_sync<T: Send + Sync>() {}
        assert_sync::<ExpressionModel>();
    }
}
