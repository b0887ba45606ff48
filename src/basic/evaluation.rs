use std::{fmt, time::Duration};

use nalgebra::DVector;
use num_complex::Complex64;
use serde::Serialize;
use tabled::{Table, settings::Style};

mod res_display;
use res_display::*;

/// Record of a single Newton-Raphson iteration.
///
/// The norms are infinity norms of the reduced deviation blocks before the
/// correction and of the applied voltage correction. Unsuccessful iterations
/// carry `+∞` everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IterationEvaluation {
    pub index: usize,
    pub successful: bool,
    pub delta_p_max: f64,
    pub delta_q_max: f64,
    /// `+∞` when the network has no PV nodes.
    pub delta_v2_max: f64,
    pub delta_e_max: f64,
    pub delta_f_max: f64,
}

impl IterationEvaluation {
    pub fn failed(index: usize) -> Self {
        Self {
            index,
            successful: false,
            delta_p_max: f64::INFINITY,
            delta_q_max: f64::INFINITY,
            delta_v2_max: f64::INFINITY,
            delta_e_max: f64::INFINITY,
            delta_f_max: f64::INFINITY,
        }
    }
}

/// How a solve left the iteration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Termination {
    /// Active and reactive power mismatch below epsilon.
    Converged,
    /// Iteration budget used up without convergence.
    IterationBudgetExhausted,
    /// The linear system could not be solved.
    SolveFailed,
    /// Stopped by an internal consistency violation.
    #[default]
    Aborted,
}

/// Evaluation of a complete solve.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunEvaluation {
    pub successful: bool,
    pub termination: Termination,
    pub iterations: Vec<IterationEvaluation>,
    pub epsilon: f64,
    pub duration: Duration,
}

impl RunEvaluation {
    /// Renders the iteration trace as a markdown table.
    pub fn to_table(&self) -> String {
        let rows = self.iterations.iter().map(IterationResTable::from);
        Table::new(rows).with(Style::markdown()).to_string()
    }
}

impl fmt::Display for RunEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "NewtonRaphsonEvaluation [successful = {}, termination = {:?}, epsilon = {:e}, duration = {:?}]",
            self.successful, self.termination, self.epsilon, self.duration
        )?;
        write!(f, "{}", self.to_table())
    }
}

/// Outcome of one power flow solve. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerFlowResult {
    valid: bool,
    v: DVector<Complex64>,
    iterated_s: DVector<Complex64>,
    slack_s: Complex64,
    evaluation: RunEvaluation,
}

impl PowerFlowResult {
    pub(crate) fn new(
        valid: bool,
        v: DVector<Complex64>,
        iterated_s: DVector<Complex64>,
        slack_s: Complex64,
        evaluation: RunEvaluation,
    ) -> Self {
        Self {
            valid,
            v,
            iterated_s,
            slack_s,
            evaluation,
        }
    }

    /// `true` only for a converged solve.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Final nodal voltages.
    pub fn voltages(&self) -> &DVector<Complex64> {
        &self.v
    }

    /// Nodal apparent power computed in the last iteration.
    pub fn iterated_power(&self) -> &DVector<Complex64> {
        &self.iterated_s
    }

    /// Apparent power at the slack node.
    pub fn slack_power(&self) -> Complex64 {
        self.slack_s
    }

    pub fn evaluation(&self) -> &RunEvaluation {
        &self.evaluation
    }

    /// Number of recorded iterations, including a failed one.
    pub fn iterations(&self) -> usize {
        self.evaluation.iterations.len()
    }

    /// Renders node voltages and iterated powers as a markdown table.
    pub fn to_table(&self) -> String {
        let rows = self
            .v
            .iter()
            .zip(self.iterated_s.iter())
            .enumerate()
            .map(|(node, (v, s))| NodeResTable {
                Node: node,
                Vm: FloatWrapper::new(v.norm(), 5),
                Va: FloatWrapper::new(v.arg().to_degrees(), 5),
                P: FloatWrapper::new(s.re, 5),
                Q: FloatWrapper::new(s.im, 5),
            });
        Table::new(rows).with(Style::markdown()).to_string()
    }
}
