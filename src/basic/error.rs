use std::convert::Infallible;

use thiserror::Error;

use super::evaluation::RunEvaluation;

/// Errors raised past the solver boundary.
///
/// Only configuration mistakes and broken internal invariants end up here.
/// A run that does not converge, or whose linear system turns out to be
/// singular, is reported through [`PowerFlowResult::is_valid`](super::PowerFlowResult::is_valid)
/// instead.
#[derive(Error, Debug)]
pub enum PowerFlowError {
    /// Missing or malformed admittance matrix, node types, target voltages or
    /// power vectors.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A NaN showed up in the reduced active or reactive power deviation.
    /// Carries the evaluation trace recorded up to that point.
    #[error("Inconsistent state: {message}")]
    InconsistentState {
        message: String,
        evaluation: Box<RunEvaluation>,
    },

    /// The linear system outside of an iteration, e.g. for a start voltage
    /// prediction, could not be solved.
    #[error("Linear solve failed: {0}")]
    LinearSolve(#[from] SolveError),
}

impl PowerFlowError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PowerFlowError::Configuration(msg.into())
    }

    /// The partial trace attached to an [`PowerFlowError::InconsistentState`].
    pub fn evaluation(&self) -> Option<&RunEvaluation> {
        match self {
            PowerFlowError::InconsistentState { evaluation, .. } => Some(evaluation),
            _ => None,
        }
    }
}

impl From<Infallible> for PowerFlowError {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// Failure of a linear solver backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolveError {
    /// The matrix cannot be factorized.
    #[error("matrix is singular")]
    SingularMatrix,
    #[error("dimension mismatch: matrix is {rows}x{cols}, right-hand side has {rhs} entries")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
    /// Backend specific failure.
    #[error("{0}")]
    Backend(&'static str),
}

pub type Result<T, E = PowerFlowError> = std::result::Result<T, E>;
