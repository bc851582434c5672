//! Core WASM model wrapper and low-level utilities.

use pathflux_core::model::{DirectionExpressions, ExpressionModel};
use pathflux_core::quadrature::QuadratureRule;
use pathflux_core::scheme::{FluxScheme, JumpEvaluator, SchemeSettings};
use pathflux_core::traits::HyperbolicModel;
use serde_wasm_bindgen::{from_value, to_value};
use std::sync::Arc;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmFluxModel {
    pub(crate) model: ExpressionModel,
    pub(crate) rule: Arc<QuadratureRule>,
    pub(crate) scheme: FluxScheme,
}

pub(crate) fn to_js_error(err: anyhow::Error) -> JsValue {
    JsValue::from_str(&format!("{:#}", err))
}

impl WasmFluxModel {
    /// Builds the wrapper without touching the JS boundary.
    pub fn from_parts(
        var_names: &[String],
        param_names: &[String],
        params: Vec<f64>,
        directions: &[DirectionExpressions],
        settings: SchemeSettings,
    ) -> anyhow::Result<Self> {
        let model = ExpressionModel::new(var_names, param_names, params, directions)?;
        let rule = Arc::new(settings.build_rule()?);
        Ok(Self {
            model,
            rule,
            scheme: settings.scheme,
        })
    }

    pub(crate) fn evaluator(&self) -> JumpEvaluator<'_, ExpressionModel> {
        JumpEvaluator::with_rule(&self.model, Arc::clone(&self.rule), self.scheme)
    }
}

#[wasm_bindgen]
impl WasmFluxModel {
    /// `directions` is an array of `{ flux, block?, wave_speed? }` objects, one per
    /// spatial direction. `settings` may be `undefined` for the defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(
        var_names: Vec<String>,
        param_names: Vec<String>,
        params: Vec<f64>,
        directions: JsValue,
        settings: JsValue,
    ) -> Result<WasmFluxModel, JsValue> {
        console_error_panic_hook::set_once();

        let directions: Vec<DirectionExpressions> = from_value(directions)
            .map_err(|e| JsValue::from_str(&format!("Invalid directions: {}", e)))?;
        let settings: SchemeSettings = if settings.is_undefined() || settings.is_null() {
            SchemeSettings::default()
        } else {
            from_value(settings)
                .map_err(|e| JsValue::from_str(&format!("Invalid settings: {}", e)))?
        };

        Self::from_parts(&var_names, &param_names, params, &directions, settings)
            .map_err(to_js_error)
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    pub fn directions(&self) -> usize {
        self.model.directions()
    }

    /// Serialized `{ kind, nodes, weights }` of the path quadrature.
    pub fn quadrature(&self) -> Result<JsValue, JsValue> {
        to_value(self.rule.as_ref())
            .map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}
