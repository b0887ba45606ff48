use derive_more::Deref;
use nalgebra::DMatrix;
use nalgebra_sparse::CscMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::error::{PowerFlowError, Result};

/// Validated nodal admittance matrix.
///
/// Always square and free of NaN entries. Build it with one of the
/// `TryFrom` conversions; the dense matrix is reachable through `Deref`.
#[derive(Debug, Clone, PartialEq, Deref, Serialize, Deserialize)]
#[serde(try_from = "DMatrix<Complex64>", into = "DMatrix<Complex64>")]
pub struct AdmittanceMatrix(pub(crate) DMatrix<Complex64>);

impl AdmittanceMatrix {
    /// Number of nodes covered by the matrix.
    pub fn node_count(&self) -> usize {
        self.0.nrows()
    }

    pub fn as_matrix(&self) -> &DMatrix<Complex64> {
        &self.0
    }

    /// Row-wise construction. Rows of differing length count as missing entries.
    pub fn from_rows(rows: &[Vec<Complex64>]) -> Result<Self> {
        let n = rows.len();
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n) {
            return Err(PowerFlowError::config(format!(
                "The admittance matrix has non matching dimensions. Row {i} holds {} of {n} entries.",
                row.len()
            )));
        }
        Self::try_from(DMatrix::from_fn(n, n, |i, j| rows[i][j]))
    }
}

impl TryFrom<DMatrix<Complex64>> for AdmittanceMatrix {
    type Error = PowerFlowError;

    fn try_from(y: DMatrix<Complex64>) -> Result<Self> {
        if !y.is_square() {
            return Err(PowerFlowError::config(format!(
                "The admittance matrix has non matching dimensions ({}x{}). Has to be a NxN-matrix.",
                y.nrows(),
                y.ncols()
            )));
        }
        if y.is_empty() {
            return Err(PowerFlowError::config("The admittance matrix is empty."));
        }
        if let Some(idx) = y.iter().position(|x| x.is_nan()) {
            let (r, c) = (idx % y.nrows(), idx / y.nrows());
            return Err(PowerFlowError::config(format!(
                "The admittance matrix does contain NaN values (at {r},{c})."
            )));
        }
        Ok(Self(y))
    }
}

impl TryFrom<&CscMatrix<Complex64>> for AdmittanceMatrix {
    type Error = PowerFlowError;

    /// Densifies a sparse Y-bus. Entries outside the pattern are zero.
    fn try_from(y: &CscMatrix<Complex64>) -> Result<Self> {
        let mut dense = DMatrix::zeros(y.nrows(), y.ncols());
        for (r, c, v) in y.triplet_iter() {
            dense[(r, c)] += *v;
        }
        Self::try_from(dense)
    }
}

impl From<AdmittanceMatrix> for DMatrix<Complex64> {
    fn from(y: AdmittanceMatrix) -> Self {
        y.0
    }
}
