//! Small reference networks used by the tests and the demos.
//!
//! Each case returns the admittance matrix, the node types, the target
//! voltages and the actual nodal power.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::basic::{AdmittanceMatrix, NodeType};

pub type TestCase = (
    AdmittanceMatrix,
    Vec<NodeType>,
    DVector<Complex64>,
    DVector<Complex64>,
);

fn c(re: f64, im: f64) -> Complex64 {
    Complex64::new(re, im)
}

/// Admittance matrix of lines with series admittance `y` between the given node pairs.
fn from_lines(n: usize, lines: &[(usize, usize)], y: Complex64) -> AdmittanceMatrix {
    let mut m = DMatrix::from_element(n, n, Complex64::new(0.0, 0.0));
    for &(a, b) in lines {
        m[(a, a)] += y;
        m[(b, b)] += y;
        m[(a, b)] -= y;
        m[(b, a)] -= y;
    }
    AdmittanceMatrix(m)
}

/// Slack node feeding one PQ node over a single line `y = 2 - 4j`.
///
/// The PQ node feeds `1 + 0.5j` into the network (actual power `-1 - 0.5j`,
/// consumption counts positive). The exact solution is
/// `f = 0.15, e = (1 + sqrt(1.71)) / 2` at the PQ node.
pub fn two_node() -> TestCase {
    let y = from_lines(2, &[(0, 1)], c(2.0, -4.0));
    (
        y,
        vec![NodeType::Slack, NodeType::PQ],
        DVector::from_element(2, c(1.0, 0.0)),
        DVector::from_vec(vec![c(0.0, 0.0), c(-1.0, -0.5)]),
    )
}

/// Meshed three node network with one generator at `|V| = 1.02` and one load.
pub fn three_node() -> TestCase {
    let y = from_lines(3, &[(0, 1), (0, 2), (1, 2)], c(1.0, -5.0));
    (
        y,
        vec![NodeType::Slack, NodeType::PV, NodeType::PQ],
        DVector::from_vec(vec![c(1.0, 0.0), c(1.02, 0.0), c(1.0, 0.0)]),
        DVector::from_vec(vec![c(0.0, 0.0), c(-0.3, 0.0), c(0.5, 0.2)]),
    )
}

/// Ring of `n` nodes with identical lines `y = 1 - 5j`.
pub fn ring_network(n: usize) -> AdmittanceMatrix {
    let lines: Vec<_> = (0..n).map(|i| (i, (i + 1) % n)).collect();
    from_lines(n, &lines, c(1.0, -5.0))
}
