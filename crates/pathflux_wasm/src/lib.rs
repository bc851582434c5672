//! WebAssembly bindings for `pathflux_core`.
//!
//! `WasmFluxModel` owns an expression-defined model and a quadrature rule;
//! the interface jump operations live in `jumps`.

mod jumps;
mod system;

pub use system::WasmFluxModel;
