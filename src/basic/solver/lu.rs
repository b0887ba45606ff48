use nalgebra::{DMatrix, DVector};

use super::{Solve, check_dimensions, check_finite};
use crate::basic::error::SolveError;

/// Dense LU factorization with partial pivoting from nalgebra.
///
/// The reduced Jacobian is assembled densely, so this is the natural default.
#[derive(Default, Debug, Clone)]
pub struct LuSolver;

impl Solve for LuSolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        check_dimensions(a, b)?;
        let lu = a.clone().lu();
        let x = lu.solve(b).ok_or(SolveError::SingularMatrix)?;
        check_finite(x)
    }
}
