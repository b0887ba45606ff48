use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CscMatrix;
use rsparse::{
    self,
    data::{self, Numeric, Symb},
    lsolve, lu, sqr, usolve,
};

use super::{Solve, check_dimensions, check_finite};
use crate::basic::error::SolveError;

/// Sparse LU from rsparse. The symbolic analysis is kept between calls as
/// long as the sparsity pattern of the matrix does not change.
#[derive(Default)]
pub struct RSparseSolver {
    x: Vec<f64>,
    pattern: (Vec<usize>, Vec<usize>),
    symbolic: Option<Symb>,
}

#[allow(non_snake_case)]
impl Solve for RSparseSolver {
    fn solve(&mut self, a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>, SolveError> {
        check_dimensions(a, b)?;
        let n = a.nrows();
        let (Ap, Ai, Ax) = CscMatrix::from(a).disassemble();
        if Ax.is_empty() {
            return Err(SolveError::SingularMatrix);
        }
        let p: Vec<isize> = Ap.iter().map(|&v| v as isize).collect();
        // Exact zeros (e.g. f = 0 on a flat start) are dropped by the
        // conversion, so the pattern can differ from one iteration to the next.
        let same_pattern = self.pattern.0 == Ap && self.pattern.1 == Ai;
        let a = data::Sprs {
            m: n,
            n,
            i: Ai.clone(),
            p,
            nzmax: Ax.len(),
            x: Ax,
        };
        if self.symbolic.is_none() || !same_pattern {
            self.symbolic = Some(sqr(&a, 1, false));
            self.pattern = (Ap, Ai);
            self.x = vec![0.0; n];
        }
        let Some(s) = self.symbolic.as_mut() else {
            return Err(SolveError::Backend("rsparse symbolic analysis missing"));
        };
        let num = lu(&a, s, 1e-6).map_err(|_| SolveError::SingularMatrix)?; // numeric LU factorization
        let mut out = b.as_slice().to_vec();
        ipvec(&num.pinv, b.as_slice(), &mut self.x[..]); // x = P*b
        lsolve(&num.l, &mut self.x); // x = L\x
        usolve(&num.u, &mut self.x); // x = U\x
        ipvec(&s.q, &self.x, &mut out[..]); // b = Q*x

        check_finite(DVector::from_vec(out))
    }

    fn reset(&mut self) {
        self.symbolic = None;
    }
}

fn ipvec_identity<T: Numeric<T>>(b: &[T], x: &mut [T]) {
    x.copy_from_slice(b);
}

fn ipvec_perm<T: Numeric<T>>(p: &[isize], b: &[T], x: &mut [T]) {
    for k in 0..b.len() {
        x[p[k] as usize] = b[k];
    }
}

fn ipvec<T: Numeric<T>>(p: &Option<Vec<isize>>, b: &[T], x: &mut [T]) {
    match p {
        Some(pvec) => ipvec_perm(pvec, b, x),
        None => ipvec_identity(b, x),
    }
}
