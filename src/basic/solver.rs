use nalgebra::{DMatrix, DVector};

use super::error::SolveError;

mod lu;
pub use lu::*;

#[cfg(feature = "faer")]
mod faer;
#[cfg(feature = "faer")]
pub use faer::*;

#[cfg(feature = "rsparse")]
mod rsparse;
#[cfg(feature = "rsparse")]
pub use rsparse::*;

/// Backend used when no solver is passed explicitly.
pub type DefaultSolver = LuSolver;

/// A trait for solving the real linear systems set up by the Newton-Raphson step.
pub trait Solve {
    /// Solves `a * x = b`.
    ///
    /// # Parameters
    ///
    /// * `a` - Square system matrix (the reduced Jacobian).
    /// * `b` - Right-hand side vector.
    ///
    /// # Returns
    ///
    /// The solution `x`, or [`SolveError::SingularMatrix`] when `a` cannot be factorized.
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError>;

    /// Drops cached symbolic information, e.g. after the matrix structure changed.
    fn reset(&mut self) {}
}

impl<S: Solve + ?Sized> Solve for Box<S> {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        (**self).solve(a, b)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

#[inline]
pub(crate) fn check_dimensions(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<(), SolveError> {
    if a.nrows() != a.ncols() || a.nrows() != b.len() {
        return Err(SolveError::DimensionMismatch {
            rows: a.nrows(),
            cols: a.ncols(),
            rhs: b.len(),
        });
    }
    Ok(())
}

/// Pivoting backends may hand back inf/NaN instead of failing on a
/// numerically singular matrix.
#[inline]
pub(crate) fn check_finite(x: DVector<f64>) -> Result<DVector<f64>, SolveError> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(SolveError::SingularMatrix)
    }
}
