use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use super::{admittance::AdmittanceMatrix, node::NodeClassification};

/// Partial derivatives of the nodal power and squared voltage magnitude with
/// respect to the rectangular voltage components `e + jf`, for all nodes.
///
/// Each matrix is `N x N`; row `i` holds the derivatives of node `i`'s
/// equation with respect to the voltage of node `j`.
#[derive(Debug, Clone)]
#[allow(non_snake_case)]
pub struct PartialDerivatives {
    pub dP_df: DMatrix<f64>,
    pub dP_de: DMatrix<f64>,
    pub dQ_df: DMatrix<f64>,
    pub dQ_de: DMatrix<f64>,
    pub dV2_df: DMatrix<f64>,
    pub dV2_de: DMatrix<f64>,
}

/// Computes the unreduced partial derivatives of the power flow equations.
///
/// With `Y = G + jB` and `V = e + jf` the nodal power is
/// `P_i = e_i Σ(g_ij e_j - b_ij f_j) + f_i Σ(g_ij f_j + b_ij e_j)` and
/// `Q_i = f_i Σ(g_ij e_j - b_ij f_j) - e_i Σ(g_ij f_j + b_ij e_j)`.
/// The diagonal terms collect the self coupling of node `i` with every other
/// node on top of the `2 e_i g_ii` style contributions of its own voltage.
#[allow(non_snake_case)]
pub fn partial_derivatives(y: &AdmittanceMatrix, v: &DVector<Complex64>) -> PartialDerivatives {
    let n = y.node_count();
    let mut d = PartialDerivatives {
        dP_df: DMatrix::zeros(n, n),
        dP_de: DMatrix::zeros(n, n),
        dQ_df: DMatrix::zeros(n, n),
        dQ_de: DMatrix::zeros(n, n),
        dV2_df: DMatrix::zeros(n, n),
        dV2_de: DMatrix::zeros(n, n),
    };
    for i in 0..n {
        let (ei, fi) = (v[i].re, v[i].im);
        let (mut s1, mut s2, mut s3, mut s4) = (0.0, 0.0, 0.0, 0.0);
        for j in 0..n {
            let (gij, bij) = (y[(i, j)].re, y[(i, j)].im);
            if i != j {
                let (ej, fj) = (v[j].re, v[j].im);
                d.dP_df[(i, j)] = -ei * bij + fi * gij;
                d.dP_de[(i, j)] = ei * gij + fi * bij;
                d.dQ_df[(i, j)] = -fi * bij - ei * gij;
                d.dQ_de[(i, j)] = fi * gij - ei * bij;
                s1 += fj * gij + ej * bij;
                s2 += ej * gij - fj * bij;
                s3 += ej * gij - fj * bij;
                s4 -= fj * gij + ej * bij;
            } else {
                d.dP_df[(i, i)] = 2.0 * fi * gij;
                d.dP_de[(i, i)] = 2.0 * ei * gij;
                d.dQ_df[(i, i)] = -2.0 * fi * bij;
                d.dQ_de[(i, i)] = -2.0 * ei * bij;
                d.dV2_df[(i, i)] = 2.0 * fi;
                d.dV2_de[(i, i)] = 2.0 * ei;
            }
        }
        d.dP_df[(i, i)] += s1;
        d.dP_de[(i, i)] += s2;
        d.dQ_df[(i, i)] += s3;
        d.dQ_de[(i, i)] += s4;
    }
    d
}

/// Builds the reduced Jacobian for the current voltage estimate.
///
/// Layout, with `m = N - 1` non-slack nodes as columns `[∂/∂f | ∂/∂e]`:
///
/// ```text
/// rows 0 .. m              ∂P   of every non-slack node
/// rows m .. 2m - npv       ∂Q   of every PQ node
/// rows 2m - npv .. 2m      ∂V²  of every PV node
/// ```
///
/// The result is always `2(N-1) x 2(N-1)`.
pub fn build_reduced_jacobian(
    y: &AdmittanceMatrix,
    v: &DVector<Complex64>,
    nodes: &NodeClassification,
) -> DMatrix<f64> {
    let d = partial_derivatives(y, v);
    let cols: Vec<usize> = nodes.non_slack().collect();
    let m = cols.len();
    let mut jac = DMatrix::zeros(2 * m, 2 * m);

    let blocks = [
        (nodes.non_slack().collect::<Vec<_>>(), &d.dP_df, &d.dP_de),
        (nodes.pq_nodes().collect(), &d.dQ_df, &d.dQ_de),
        (nodes.pv_nodes().collect(), &d.dV2_df, &d.dV2_de),
    ];
    let mut row = 0;
    for (rows, d_df, d_de) in blocks.iter() {
        for &i in rows {
            for (c, &j) in cols.iter().enumerate() {
                jac[(row, c)] = d_df[(i, j)];
                jac[(row, m + c)] = d_de[(i, j)];
            }
            row += 1;
        }
    }
    debug_assert_eq!(row, 2 * m);
    jac
}
