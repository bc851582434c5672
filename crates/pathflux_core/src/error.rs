use thiserror::Error;

/// Failures raised by this crate itself.
///
/// Public operations return `anyhow::Result`; errors of this type can be
/// recovered with `err.downcast_ref::<FluxError>()`. Errors produced by a
/// model implementation are passed through untouched and never appear here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FluxError {
    #[error("invalid input: {side} state has length {got}, expected {expected}")]
    DimensionMismatch {
        side: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid input: direction {direction} is out of range (model has {directions})")]
    DirectionOutOfRange { direction: usize, directions: usize },
    #[error("{what} has shape {got:?}, expected {expected:?}")]
    MatrixShape {
        what: &'static str,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("eigenvector matrix is singular at quadrature node {node}")]
    SingularEigenbasis { node: usize },
    #[error("model has zero dimension")]
    EmptySystem,
    #[error("quadrature rule: {0}")]
    Quadrature(String),
    #[error("expression: {0}")]
    Expression(String),
}
