use faer::{
    MatMut,
    linalg::solvers::Solve,
    sparse::{
        SparseColMatRef, SymbolicSparseColMatRef,
        linalg::solvers::{Lu, SymbolicLu},
    },
};
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;

use super::{Solve as PfSolve, check_dimensions, check_finite};
use crate::basic::error::SolveError;

/// Sparse LU from faer. The symbolic factorization is rebuilt whenever the
/// sparsity pattern changes.
#[derive(Default)]
pub struct FaerSolver {
    pattern: (Vec<usize>, Vec<usize>),
    symbolic: Option<SymbolicLu<usize>>,
}

#[allow(non_snake_case)]
impl PfSolve for FaerSolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        check_dimensions(a, b)?;
        let n = a.nrows();
        let (Ap, Ai, Ax) = CscMatrix::from(a).disassemble();
        if Ax.is_empty() {
            return Err(SolveError::SingularMatrix);
        }
        let s = unsafe { SymbolicSparseColMatRef::new_unchecked(n, n, &Ap, None, &Ai) };
        let mat = SparseColMatRef::new(s, &Ax);
        if self.symbolic.is_none() || self.pattern.0 != Ap || self.pattern.1 != Ai {
            self.symbolic =
                Some(SymbolicLu::try_new(s).map_err(|_| SolveError::Backend("Faer symbolic error"))?);
            self.pattern = (Ap.clone(), Ai.clone());
        }
        let Some(symbolic) = self.symbolic.as_ref() else {
            return Err(SolveError::Backend("Faer symbolic error"));
        };
        let lu = Lu::try_new_with_symbolic(symbolic.clone(), mat)
            .map_err(|_| SolveError::SingularMatrix)?;
        let mut x = b.as_slice().to_vec();
        let mat_ref = MatMut::from_column_major_slice_mut(&mut x, n, 1);
        lu.solve_in_place(mat_ref);
        check_finite(DVector::from_vec(x))
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}
