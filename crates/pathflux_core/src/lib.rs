pub mod autodiff;
pub mod eigen;
pub mod equation_engine;
pub mod error;
pub mod model;
pub mod path;
pub mod quadrature;
pub mod scheme;
/// The `pathflux_core` crate computes interface jump terms for path-conservative
/// finite-volume schemes for hyperbolic systems `q_t + F(q)_x + B(q) q_x = 0`.
///
/// Key components:
/// - **Traits**: `HyperbolicModel` (flux, Jacobian, coupling matrix, wave speeds) and `Scalar`.
/// - **Quadrature**: `QuadratureRule`, an immutable Gauss-Legendre/Lobatto table on `[0, 1]`.
/// - **Path integrals**: coupling (`Bint`), Osher-Solomon (`Aint`) and wave-speed bound (`s_max`).
/// - **Schemes**: `JumpEvaluator` assembling Rusanov (`Drus`) and Osher-Solomon (`Dos`) jumps.
/// - **Expression model**: a bytecode VM plus dual-number autodiff to define models from strings.
pub mod traits;

pub use error::FluxError;
pub use model::{DirectionExpressions, ExpressionModel};
pub use quadrature::{QuadratureKind, QuadratureRule};
pub use scheme::{FluxScheme, JumpEvaluator, JumpTerms, Orientation, SchemeSettings};
pub use traits::{EigenSystem, HyperbolicModel};
