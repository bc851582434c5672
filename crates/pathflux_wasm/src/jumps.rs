//! Interface jump operations exposed on `WasmFluxModel`.

use crate::system::{to_js_error, WasmFluxModel};
use nalgebra::DMatrix;
use pathflux_core::scheme::{JumpTerms, Orientation};
use pathflux_core::traits::HyperbolicModel;
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

#[derive(Serialize)]
struct JumpPayload {
    jump: Vec<f64>,
    terms: JumpTerms,
}

#[wasm_bindgen]
impl WasmFluxModel {
    pub fn flux(&self, q: &[f64], direction: usize) -> Result<Vec<f64>, JsValue> {
        if q.len() != self.model.dimension() {
            return Err(JsValue::from_str("State dimension mismatch"));
        }
        let mut out = vec![0.0; q.len()];
        self.model.flux(q, direction, &mut out).map_err(to_js_error)?;
        Ok(out)
    }

    /// Flux Jacobian in row-major order.
    pub fn jacobian(&self, q: &[f64], direction: usize) -> Result<Vec<f64>, JsValue> {
        let n = self.model.dimension();
        if q.len() != n {
            return Err(JsValue::from_str("State dimension mismatch"));
        }
        let mut jac = DMatrix::zeros(n, n);
        self.model.jacobian(q, direction, &mut jac).map_err(to_js_error)?;
        Ok(jac.transpose().as_slice().to_vec())
    }

    pub fn b_integral(&self, ql: &[f64], qr: &[f64], direction: usize) -> Result<Vec<f64>, JsValue> {
        self.evaluator().b_integral(ql, qr, direction).map_err(to_js_error)
    }

    pub fn a_integral(&self, ql: &[f64], qr: &[f64], direction: usize) -> Result<Vec<f64>, JsValue> {
        self.evaluator().a_integral(ql, qr, direction).map_err(to_js_error)
    }

    pub fn wave_speed_bound(
        &self,
        ql: &[f64],
        qr: &[f64],
        direction: usize,
    ) -> Result<Vec<f64>, JsValue> {
        self.evaluator()
            .wave_speed_bound(ql, qr, direction)
            .map_err(to_js_error)
    }

    pub fn rusanov(
        &self,
        ql: &[f64],
        qr: &[f64],
        direction: usize,
        pos: bool,
    ) -> Result<Vec<f64>, JsValue> {
        self.evaluator()
            .rusanov(ql, qr, direction, pos)
            .map_err(to_js_error)
    }

    pub fn osher_solomon(
        &self,
        ql: &[f64],
        qr: &[f64],
        direction: usize,
        pos: bool,
    ) -> Result<Vec<f64>, JsValue> {
        self.evaluator()
            .osher_solomon(ql, qr, direction, pos)
            .map_err(to_js_error)
    }

    /// Jump with the scheme chosen at construction.
    pub fn jump(
        &self,
        ql: &[f64],
        qr: &[f64],
        direction: usize,
        pos: bool,
    ) -> Result<Vec<f64>, JsValue> {
        self.evaluator()
            .jump(ql, qr, direction, pos)
            .map_err(to_js_error)
    }

    /// Serialized `{ jump, terms: { conservative, coupling, dissipation } }`.
    pub fn jump_terms(
        &self,
        ql: &[f64],
        qr: &[f64],
        direction: usize,
        pos: bool,
    ) -> Result<JsValue, JsValue> {
        let terms = self
            .evaluator()
            .jump_terms(ql, qr, direction, self.scheme)
            .map_err(to_js_error)?;
        let payload = JumpPayload {
            jump: terms.assemble(Orientation::from_pos(pos)),
            terms,
        };
        to_value(&payload).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }
}
