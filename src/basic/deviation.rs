use nalgebra::{DVector, DVectorView};
use num_complex::Complex64;

use super::{
    error::{PowerFlowError, Result},
    node::NodeClassification,
};

/// Reduced right-hand side of the Newton-Raphson system.
///
/// Concatenation of the active power mismatch at all non-slack nodes, the
/// reactive power mismatch at PQ nodes and the squared voltage magnitude
/// mismatch at PV nodes, each in node order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviationVector {
    values: DVector<f64>,
    n_p: usize,
    n_q: usize,
}

impl DeviationVector {
    pub fn as_vector(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn into_vector(self) -> DVector<f64> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Active power block.
    pub fn p(&self) -> DVectorView<'_, f64> {
        self.values.rows(0, self.n_p)
    }

    /// Reactive power block.
    pub fn q(&self) -> DVectorView<'_, f64> {
        self.values.rows(self.n_p, self.n_q)
    }

    /// Squared voltage magnitude block, `None` without PV nodes.
    pub fn v2(&self) -> Option<DVectorView<'_, f64>> {
        let start = self.n_p + self.n_q;
        let n = self.values.len() - start;
        (n > 0).then(|| self.values.rows(start, n))
    }

    pub fn p_norm(&self) -> f64 {
        inf_norm(self.p().iter())
    }

    pub fn q_norm(&self) -> f64 {
        inf_norm(self.q().iter())
    }

    /// Infinity norm of the squared voltage block; `+∞` without PV nodes.
    pub fn v2_norm(&self) -> f64 {
        self.v2().map_or(f64::INFINITY, |v| inf_norm(v.iter()))
    }

    /// Position of the first NaN in the active or reactive power block.
    pub(crate) fn find_nan(&self) -> Option<(&'static str, usize)> {
        if let Some(i) = self.p().iter().position(|x| x.is_nan()) {
            return Some(("deltaP", i));
        }
        self.q()
            .iter()
            .position(|x| x.is_nan())
            .map(|i| ("deltaQ", i))
    }
}

/// Maximum absolute value, `0` for an empty sequence.
pub(crate) fn inf_norm<'a>(values: impl Iterator<Item = &'a f64>) -> f64 {
    values.fold(0.0, |acc, x| acc.max(x.abs()))
}

/// Projects the complex power and squared voltage deviations onto the
/// reduced deviation vector.
///
/// `delta_v2` may be omitted when the network has no PV nodes.
pub fn reduce_deviation_vector(
    delta_s: &DVector<Complex64>,
    delta_v2: Option<&DVector<f64>>,
    nodes: &NodeClassification,
) -> Result<DeviationVector> {
    let n = nodes.node_count();
    if delta_s.len() != n || delta_v2.is_some_and(|d| d.len() != n) {
        return Err(PowerFlowError::InconsistentState {
            message: format!("Deviation vectors do not cover all {n} nodes."),
            evaluation: Box::default(),
        });
    }
    let npv = nodes.npv();
    let delta_v2 = match delta_v2 {
        Some(d) => Some(d),
        None if npv == 0 => None,
        None => {
            return Err(PowerFlowError::InconsistentState {
                message: "The vector of squared voltage magnitude deviation may not be absent."
                    .into(),
                evaluation: Box::default(),
            });
        }
    };

    let n_p = n - 1;
    let n_q = nodes.npq();
    let mut values = Vec::with_capacity(2 * n_p);
    values.extend(nodes.non_slack().map(|i| delta_s[i].re));
    values.extend(nodes.pq_nodes().map(|i| delta_s[i].im));
    if let Some(d) = delta_v2 {
        values.extend(nodes.pv_nodes().map(|i| d[i]));
    }
    Ok(DeviationVector {
        values: DVector::from_vec(values),
        n_p,
        n_q,
    })
}
