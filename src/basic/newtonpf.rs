use std::time::Instant;

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use num_traits::{One, Zero};
use tracing::{debug, error, info};

use super::{
    admittance::AdmittanceMatrix,
    config::NewtonRaphsonConfig,
    deviation::{DeviationVector, inf_norm, reduce_deviation_vector},
    diagnostics::Diagnostic,
    error::{PowerFlowError, Result, SolveError},
    evaluation::{IterationEvaluation, PowerFlowResult, RunEvaluation, Termination},
    jacobian::build_reduced_jacobian,
    node::{NodeClassification, NodeType},
    solver::{DefaultSolver, Solve},
};

/// Nodal apparent power handed to a solve.
///
/// `actual` is the net apparent power per node; with the sign convention
/// used here it cancels the power computed from the voltages at
/// convergence. The capability vectors describe how far each node could
/// decrease or increase its power. They are carried along but do not enter
/// the iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerInjection {
    actual: DVector<Complex64>,
    decrease: Option<DVector<Complex64>>,
    increase: Option<DVector<Complex64>>,
}

impl PowerInjection {
    pub fn new(actual: DVector<Complex64>) -> Self {
        Self {
            actual,
            decrease: None,
            increase: None,
        }
    }

    pub fn with_capabilities(
        mut self,
        decrease: DVector<Complex64>,
        increase: DVector<Complex64>,
    ) -> Self {
        self.decrease = Some(decrease);
        self.increase = Some(increase);
        self
    }

    pub fn actual(&self) -> &DVector<Complex64> {
        &self.actual
    }

    /// Capability to alter the nodal power in negative direction, zero if not given.
    pub fn decrease(&self) -> DVector<Complex64> {
        self.decrease
            .clone()
            .unwrap_or_else(|| DVector::zeros(self.actual.len()))
    }

    /// Capability to alter the nodal power in positive direction, zero if not given.
    pub fn increase(&self) -> DVector<Complex64> {
        self.increase
            .clone()
            .unwrap_or_else(|| DVector::zeros(self.actual.len()))
    }

    pub fn len(&self) -> usize {
        self.actual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actual.is_empty()
    }

    fn validate(&self, node_count: usize) -> Result<()> {
        if self.actual.len() != node_count {
            return Err(PowerFlowError::config(format!(
                "The amount of nodal powers ({}) does not match the amount of nodes covered by the admittance matrix ({node_count}).",
                self.actual.len()
            )));
        }
        for (name, cap) in [("decrease", &self.decrease), ("increase", &self.increase)] {
            if let Some(cap) = cap.as_ref().filter(|c| c.len() != node_count) {
                return Err(PowerFlowError::config(format!(
                    "The {name} capability vector holds {} entries, expected {node_count}.",
                    cap.len()
                )));
            }
        }
        Ok(())
    }
}

impl From<DVector<Complex64>> for PowerInjection {
    fn from(actual: DVector<Complex64>) -> Self {
        Self::new(actual)
    }
}

/// Public solve contract of a power flow algorithm.
///
/// Besides solving, an algorithm may offer a linearization around its last
/// solved state, which [`WarmStart`](super::WarmStart) uses to predict a
/// start voltage.
pub trait PowerFlowAlgorithm {
    /// Number of nodes of the configured network, `0` if none is set.
    fn node_count(&self) -> usize;

    /// Node classification of the configured network.
    fn classification(&self) -> Option<&NodeClassification>;

    /// Solves for `injection`, starting from `start` or a flat start.
    fn solve(
        &mut self,
        injection: &PowerInjection,
        start: Option<&DVector<Complex64>>,
    ) -> Result<PowerFlowResult>;

    /// `true` if [`PowerFlowAlgorithm::predict_voltage`] can be used, i.e. a
    /// linearization exists that still matches the configured network.
    fn can_linearize(&self) -> bool;

    /// One linearized correction of `last_v` for the power deviation `delta_s`.
    fn predict_voltage(
        &mut self,
        delta_s: &DVector<Complex64>,
        last_v: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>>;
}

/// Nodal power `S_i = V_i · conj(Σ_j Y_ij V_j)` for the given voltages.
pub fn iterated_power(y: &AdmittanceMatrix, v: &DVector<Complex64>) -> DVector<Complex64> {
    let current = y.as_matrix() * v;
    v.zip_map(&current, |v, i| v * i.conj())
}

/// Applies a solution `[ΔF; ΔE]` of the reduced system to the non-slack voltages.
pub fn apply_correction_to_voltages(
    v: &DVector<Complex64>,
    correction: &DVector<f64>,
    nodes: &NodeClassification,
) -> DVector<Complex64> {
    let m = nodes.node_count() - 1;
    let mut corrected = v.clone();
    for (k, node) in nodes.non_slack().enumerate() {
        corrected[node] -= Complex64::new(correction[m + k], correction[k]);
    }
    corrected
}

/// Squared magnitude at PV nodes, zero elsewhere.
fn squared_pv_voltages(v: &DVector<Complex64>, nodes: &NodeClassification) -> DVector<f64> {
    DVector::from_fn(v.len(), |i, _| match nodes.node_type(i) {
        NodeType::PV => v[i].norm_sqr(),
        _ => 0.0,
    })
}

/// What the linear solve of an iteration produced.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    /// Mismatch below epsilon before the correction.
    Converged,
    /// Correction applied, mismatch still above epsilon.
    Diverging,
    /// The reduced Jacobian could not be solved; voltages unchanged.
    SolveFailed(SolveError),
}

/// Result of one [`IterationStep`].
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Nodal power computed from the voltages entering the step.
    pub iterated_s: DVector<Complex64>,
    /// Reduced deviation before the correction.
    pub deviation: DeviationVector,
    pub jacobian: DMatrix<f64>,
    pub evaluation: IterationEvaluation,
    pub status: StepStatus,
}

/// One Newton-Raphson update on a fixed network and power set point.
pub struct IterationStep<'a> {
    pub admittance: &'a AdmittanceMatrix,
    pub nodes: &'a NodeClassification,
    pub actual_s: &'a DVector<Complex64>,
    pub target_v2: &'a DVector<f64>,
    pub epsilon: f64,
}

impl IterationStep<'_> {
    /// Runs iteration `index`, correcting `v` in place.
    ///
    /// A NaN in the active or reactive mismatch is an error; a singular
    /// Jacobian is reported through [`StepStatus::SolveFailed`].
    ///
    /// The step knows nothing about earlier iterations: a NaN error carries
    /// an empty [`RunEvaluation`] with [`Termination::Aborted`]. Callers
    /// driving their own loop attach their trace, as [`NewtonRaphson::solve`]
    /// does.
    pub fn run<S: Solve + ?Sized>(
        &self,
        index: usize,
        v: &mut DVector<Complex64>,
        solver: &mut S,
    ) -> Result<StepOutcome> {
        let iterated_s = iterated_power(self.admittance, v);
        let iterated_v2 = squared_pv_voltages(v, self.nodes);

        // injected and consumed power cancel at convergence
        let delta_s = self.actual_s + &iterated_s;
        let delta_v2 = iterated_v2 - self.target_v2;
        let deviation = reduce_deviation_vector(&delta_s, Some(&delta_v2), self.nodes)?;
        if let Some((block, pos)) = deviation.find_nan() {
            return Err(PowerFlowError::InconsistentState {
                message: format!("{block} contains a NaN value at position {pos}."),
                evaluation: Box::default(),
            });
        }
        let jacobian = build_reduced_jacobian(self.admittance, v, self.nodes);

        let solution = if jacobian.is_empty() {
            Ok(DVector::zeros(0))
        } else {
            solver.solve(&jacobian, deviation.as_vector())
        };
        let correction = match solution {
            Ok(x) => x,
            Err(e) => {
                error!(iteration = index, "Error during solving of system of equations: {e}");
                return Ok(StepOutcome {
                    iterated_s,
                    deviation,
                    jacobian,
                    evaluation: IterationEvaluation::failed(index),
                    status: StepStatus::SolveFailed(e),
                });
            }
        };
        *v = apply_correction_to_voltages(v, &correction, self.nodes);

        let m = self.nodes.node_count() - 1;
        let (delta_p_max, delta_q_max) = (deviation.p_norm(), deviation.q_norm());
        let evaluation = IterationEvaluation {
            index,
            successful: true,
            delta_p_max,
            delta_q_max,
            delta_v2_max: deviation.v2_norm(),
            delta_e_max: inf_norm(correction.rows(m, m).iter()),
            delta_f_max: inf_norm(correction.rows(0, m).iter()),
        };
        debug!(
            iteration = index,
            delta_p = delta_p_max,
            delta_q = delta_q_max,
            delta_v2 = evaluation.delta_v2_max,
            "Newton-Raphson iteration"
        );
        let divergent = delta_p_max >= self.epsilon || delta_q_max >= self.epsilon;
        Ok(StepOutcome {
            iterated_s,
            deviation,
            jacobian,
            evaluation,
            status: if divergent {
                StepStatus::Diverging
            } else {
                StepStatus::Converged
            },
        })
    }
}

/// Newton-Raphson power flow in rectangular coordinates.
///
/// The admittance matrix, node types and target voltages are set once; each
/// [`NewtonRaphson::solve`] then runs for a new power set point. The last
/// Jacobian is kept for warm starts until the admittance matrix changes.
pub struct NewtonRaphson<S: Solve = DefaultSolver> {
    config: NewtonRaphsonConfig,
    admittance: Option<AdmittanceMatrix>,
    nodes: Option<NodeClassification>,
    diagnostics: Vec<Diagnostic>,
    v_target: Option<DVector<Complex64>>,
    jacobian: Option<DMatrix<f64>>,
    /// Set on every admittance change, cleared once a Jacobian is rebuilt.
    admittance_changed: bool,
    solver: S,
}

impl NewtonRaphson<DefaultSolver> {
    pub fn new(config: NewtonRaphsonConfig) -> Result<Self> {
        Self::with_solver(config, DefaultSolver::default())
    }
}

impl<S: Solve> NewtonRaphson<S> {
    pub fn with_solver(config: NewtonRaphsonConfig, solver: S) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            admittance: None,
            nodes: None,
            diagnostics: Vec::new(),
            v_target: None,
            jacobian: None,
            admittance_changed: false,
            solver,
        })
    }

    pub fn config(&self) -> &NewtonRaphsonConfig {
        &self.config
    }

    pub fn epsilon(&self) -> f64 {
        self.config.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) -> Result<()> {
        let config = NewtonRaphsonConfig {
            epsilon,
            ..self.config
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn max_iterations(&self) -> usize {
        self.config.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> Result<()> {
        let config = NewtonRaphsonConfig {
            max_iterations,
            ..self.config
        };
        config.validate()?;
        self.config = config;
        Ok(())
    }

    pub fn admittance_matrix(&self) -> Option<&AdmittanceMatrix> {
        self.admittance.as_ref()
    }

    /// Validates and sets the admittance matrix. Any kept Jacobian is stale afterwards.
    pub fn set_admittance_matrix<Y>(&mut self, admittance: Y) -> Result<()>
    where
        Y: TryInto<AdmittanceMatrix>,
        PowerFlowError: From<Y::Error>,
    {
        let admittance = admittance.try_into()?;
        self.admittance = Some(admittance);
        self.admittance_changed = true;
        self.solver.reset();
        Ok(())
    }

    /// `true` while the kept Jacobian does not reflect the current admittance matrix.
    pub fn admittance_changed(&self) -> bool {
        self.admittance_changed
    }

    /// Classifies and sets the node types. Requires the admittance matrix.
    ///
    /// Returns the non-fatal findings of the classification.
    pub fn set_node_types(&mut self, node_types: &[NodeType]) -> Result<Vec<Diagnostic>> {
        let (nodes, diagnostics) = NodeClassification::classify(node_types, self.node_count())?;
        self.nodes = Some(nodes);
        self.diagnostics = diagnostics.clone();
        // the reduced system changes shape with the node types
        self.jacobian = None;
        self.solver.reset();
        Ok(diagnostics)
    }

    pub fn node_types(&self) -> Option<&[NodeType]> {
        self.nodes.as_ref().map(NodeClassification::types)
    }

    /// Findings of the last node classification.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn set_target_voltages(&mut self, v_target: DVector<Complex64>) -> Result<()> {
        let n = self.node_count();
        if v_target.len() != n {
            return Err(PowerFlowError::config(format!(
                "The vector of target voltages ({}) does not match the total amount of nodes ({n}).",
                v_target.len()
            )));
        }
        if let Some(i) = v_target.iter().position(|v| !(v.re.is_finite() && v.im.is_finite())) {
            return Err(PowerFlowError::config(format!(
                "The target voltage at node {i} is not a finite number."
            )));
        }
        self.v_target = Some(v_target);
        Ok(())
    }

    pub fn target_voltages(&self) -> Option<&DVector<Complex64>> {
        self.v_target.as_ref()
    }

    /// Reduced Jacobian of the last iteration, if any.
    pub fn jacobian(&self) -> Option<&DMatrix<f64>> {
        self.jacobian.as_ref()
    }

    /// Runs the Newton-Raphson iteration for `injection`.
    ///
    /// Without `start` every node is flat started at `1∠0`. The slack node is
    /// pinned to its target voltage in both cases.
    ///
    /// Non-convergence and a singular Jacobian yield an invalid result, not
    /// an error.
    pub fn solve(
        &mut self,
        injection: &PowerInjection,
        start: Option<&DVector<Complex64>>,
    ) -> Result<PowerFlowResult> {
        let (y, nodes, v_target) =
            preconditions(&self.admittance, &self.nodes, &self.v_target, injection)?;
        let n = y.node_count();
        let epsilon = self.config.epsilon;

        let mut v = match start {
            Some(start) if start.len() != n => {
                return Err(PowerFlowError::config(format!(
                    "The start voltage vector ({}) does not match the amount of nodes ({n}).",
                    start.len()
                )));
            }
            Some(start) => start.clone(),
            None => DVector::from_element(n, Complex64::one()),
        };
        v[nodes.slack()] = v_target[nodes.slack()];

        let target_v2 = v_target.map(|v| v.norm_sqr());
        let step = IterationStep {
            admittance: y,
            nodes,
            actual_s: injection.actual(),
            target_v2: &target_v2,
            epsilon,
        };

        let calc_start = Instant::now();
        let mut evaluation = Vec::new();
        let mut iterated_s = DVector::from_element(n, Complex64::zero());
        let mut termination = Termination::IterationBudgetExhausted;

        for index in 0..self.config.max_iterations {
            let outcome = match step.run(index, &mut v, &mut self.solver) {
                Ok(outcome) => outcome,
                Err(PowerFlowError::InconsistentState { message, .. }) => {
                    error!("{message}");
                    return Err(PowerFlowError::InconsistentState {
                        message,
                        evaluation: Box::new(RunEvaluation {
                            successful: false,
                            termination: Termination::Aborted,
                            iterations: evaluation,
                            epsilon,
                            duration: calc_start.elapsed(),
                        }),
                    });
                }
                Err(e) => return Err(e),
            };
            self.jacobian = Some(outcome.jacobian);
            self.admittance_changed = false;
            iterated_s = outcome.iterated_s;
            evaluation.push(outcome.evaluation);
            match outcome.status {
                StepStatus::Diverging => {}
                StepStatus::Converged => {
                    termination = Termination::Converged;
                    break;
                }
                StepStatus::SolveFailed(_) => {
                    termination = Termination::SolveFailed;
                    break;
                }
            }
        }

        let converged = termination == Termination::Converged;
        if converged {
            info!(
                iterations = evaluation.len(),
                epsilon, "Newton Raphson power flow did converge"
            );
        } else {
            info!(
                iterations = evaluation.len(),
                epsilon,
                ?termination,
                "Newton Raphson power flow did NOT converge"
            );
        }
        let slack_s = iterated_s[nodes.slack()];
        Ok(PowerFlowResult::new(
            converged,
            v,
            iterated_s,
            slack_s,
            RunEvaluation {
                successful: converged,
                termination,
                iterations: evaluation,
                epsilon,
                duration: calc_start.elapsed(),
            },
        ))
    }
}

fn preconditions<'a>(
    admittance: &'a Option<AdmittanceMatrix>,
    nodes: &'a Option<NodeClassification>,
    v_target: &'a Option<DVector<Complex64>>,
    injection: &PowerInjection,
) -> Result<(&'a AdmittanceMatrix, &'a NodeClassification, &'a DVector<Complex64>)> {
    let Some(y) = admittance.as_ref() else {
        return Err(PowerFlowError::config(
            "Admittance matrix is not set, yet! Invoke setter first!",
        ));
    };
    let Some(nodes) = nodes.as_ref() else {
        return Err(PowerFlowError::config(
            "Node types are not set, yet! Invoke setter first!",
        ));
    };
    let Some(v_target) = v_target.as_ref() else {
        return Err(PowerFlowError::config(
            "Target voltages are not set, yet! Invoke setter first!",
        ));
    };
    let n = y.node_count();
    if nodes.node_count() != n || v_target.len() != n {
        return Err(PowerFlowError::config(format!(
            "Node types ({}) and target voltages ({}) do not match the admittance matrix ({n} nodes).",
            nodes.node_count(),
            v_target.len()
        )));
    }
    injection.validate(n)?;
    Ok((y, nodes, v_target))
}

impl<S: Solve> PowerFlowAlgorithm for NewtonRaphson<S> {
    fn node_count(&self) -> usize {
        self.admittance
            .as_ref()
            .map_or(0, AdmittanceMatrix::node_count)
    }

    fn classification(&self) -> Option<&NodeClassification> {
        self.nodes.as_ref()
    }

    fn solve(
        &mut self,
        injection: &PowerInjection,
        start: Option<&DVector<Complex64>>,
    ) -> Result<PowerFlowResult> {
        NewtonRaphson::solve(self, injection, start)
    }

    fn can_linearize(&self) -> bool {
        self.jacobian.is_some()
            && !self.admittance_changed
            && self.nodes.is_some()
            && self.v_target.is_some()
    }

    fn predict_voltage(
        &mut self,
        delta_s: &DVector<Complex64>,
        last_v: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>> {
        if self.admittance_changed {
            return Err(PowerFlowError::config(
                "The admittance matrix changed since the last Jacobian was built.",
            ));
        }
        let (Some(jacobian), Some(nodes), Some(v_target)) = (
            self.jacobian.as_ref(),
            self.nodes.as_ref(),
            self.v_target.as_ref(),
        ) else {
            return Err(PowerFlowError::config(
                "No linearization of a previous solve available.",
            ));
        };
        if last_v.len() != nodes.node_count() {
            return Err(PowerFlowError::config(format!(
                "The last known voltage vector ({}) does not match the amount of nodes ({}).",
                last_v.len(),
                nodes.node_count()
            )));
        }
        let delta_v2 = DVector::from_fn(last_v.len(), |i, _| {
            last_v[i].norm_sqr() - v_target[i].norm_sqr()
        });
        let deviation = reduce_deviation_vector(delta_s, Some(&delta_v2), nodes)?;
        let correction = if jacobian.is_empty() {
            DVector::zeros(0)
        } else {
            self.solver.solve(jacobian, deviation.as_vector())?
        };
        Ok(apply_correction_to_voltages(last_v, &correction, nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::solver::LuSolver;
    use crate::testcases;

    fn c(re: f64, im: f64) -> Complex64 {
        Complex64::new(re, im)
    }

    fn setup(case: testcases::TestCase) -> (NewtonRaphson, PowerInjection) {
        let (y, types, v_target, s) = case;
        let mut nr = NewtonRaphson::new(NewtonRaphsonConfig::default()).unwrap();
        nr.set_admittance_matrix(y).unwrap();
        nr.set_node_types(&types).unwrap();
        nr.set_target_voltages(v_target).unwrap();
        (nr, PowerInjection::new(s))
    }

    #[test]
    fn test_two_node() {
        let (mut nr, s) = setup(testcases::two_node());
        let res = nr.solve(&s, None).unwrap();
        assert!(res.is_valid());
        assert_eq!(res.iterations(), 5);
        assert_eq!(res.evaluation().termination, Termination::Converged);

        let v1 = res.voltages()[1];
        let e = (1.0 + 1.71f64.sqrt()) / 2.0;
        assert!((v1 - c(e, 0.15)).norm() < 1e-6, "{v1}");
        assert!((v1.norm() - 1.163544086629768).abs() < 1e-6);
        assert_eq!(res.voltages()[0], c(1.0, 0.0));
        assert_eq!(res.slack_power(), res.iterated_power()[0]);
        println!("{}", res.evaluation());
    }

    #[test]
    fn test_three_node_with_pv() {
        let (y, types, v_target, s) = testcases::three_node();
        let (mut nr, injection) = setup((y.clone(), types, v_target, s.clone()));
        let res = nr.solve(&injection, None).unwrap();
        assert!(res.is_valid());
        assert_eq!(res.iterations(), 4);

        let v = res.voltages();
        assert!((v[1].norm() - 1.02).abs() < 1e-6);
        let mismatch = &s + iterated_power(&y, v);
        for i in 1..3 {
            assert!(mismatch[i].re.abs() < 1e-6);
        }
        assert!(mismatch[2].im.abs() < 1e-6);

        let trace = &res.evaluation().iterations;
        for w in trace.windows(2) {
            assert!(w[1].delta_p_max < w[0].delta_p_max);
            assert!(w[1].delta_q_max < w[0].delta_q_max);
        }
        assert!(trace.iter().all(|it| it.delta_v2_max.is_finite()));
    }

    #[test]
    fn test_zero_injection_converges_immediately() {
        let (mut nr, _) = setup(testcases::two_node());
        let res = nr
            .solve(&PowerInjection::new(DVector::zeros(2)), None)
            .unwrap();
        assert!(res.is_valid());
        assert_eq!(res.iterations(), 1);
        let it = res.evaluation().iterations[0];
        assert_eq!(it.delta_p_max, 0.0);
        assert_eq!(it.delta_v2_max, f64::INFINITY);
    }

    #[test]
    fn test_slack_pinned_on_given_start() {
        let (y, types, mut v_target, s) = testcases::two_node();
        v_target[0] = c(1.05, 0.0);
        let (mut nr, s) = setup((y, types, v_target, s));
        let start = DVector::from_element(2, c(0.9, 0.1));
        let res = nr.solve(&s, Some(&start)).unwrap();
        assert!(res.is_valid());
        assert_eq!(res.voltages()[0], c(1.05, 0.0));
    }

    #[test]
    fn test_iteration_budget_exhausted() {
        let (mut nr, s) = setup(testcases::two_node());
        nr.set_max_iterations(2).unwrap();
        let res = nr.solve(&s, None).unwrap();
        assert!(!res.is_valid());
        assert_eq!(res.iterations(), 2);
        assert_eq!(
            res.evaluation().termination,
            Termination::IterationBudgetExhausted
        );
    }

    #[test]
    fn test_singular_jacobian() {
        let (_, types, v_target, s) = testcases::two_node();
        let y = DMatrix::from_element(2, 2, c(0.0, 0.0));
        let mut nr = NewtonRaphson::new(NewtonRaphsonConfig::default()).unwrap();
        nr.set_admittance_matrix(y).unwrap();
        nr.set_node_types(&types).unwrap();
        nr.set_target_voltages(v_target).unwrap();

        let res = nr.solve(&PowerInjection::new(s), None).unwrap();
        assert!(!res.is_valid());
        assert_eq!(res.iterations(), 1);
        assert_eq!(res.evaluation().termination, Termination::SolveFailed);
        assert_eq!(
            res.evaluation().iterations[0],
            IterationEvaluation::failed(0)
        );
        assert_eq!(res.voltages()[1], c(1.0, 0.0));
    }

    #[test]
    fn test_nan_power_is_inconsistent() {
        let (mut nr, _) = setup(testcases::two_node());
        let s = DVector::from_vec(vec![c(0.0, 0.0), c(f64::NAN, 0.0)]);
        let err = nr.solve(&PowerInjection::new(s), None).unwrap_err();
        let eval = err.evaluation().unwrap();
        assert!(matches!(err, PowerFlowError::InconsistentState { .. }));
        assert!(eval.iterations.is_empty());
        assert_eq!(eval.termination, Termination::Aborted);
    }

    #[test]
    fn test_single_step_nan_has_empty_trace() {
        let (y, types, v_target, mut s) = testcases::two_node();
        s[1].im = f64::NAN;
        let (nodes, _) = NodeClassification::classify(&types, 2).unwrap();
        let target_v2 = v_target.map(|v| v.norm_sqr());
        let step = IterationStep {
            admittance: &y,
            nodes: &nodes,
            actual_s: &s,
            target_v2: &target_v2,
            epsilon: 1e-6,
        };
        let mut v = v_target.clone();
        let err = step.run(0, &mut v, &mut LuSolver).unwrap_err();
        let eval = err.evaluation().unwrap();
        assert!(eval.iterations.is_empty());
        assert_eq!(eval.termination, Termination::Aborted);
        assert_eq!(v, v_target);
    }

    #[test]
    fn test_missing_configuration() {
        let (y, types, v_target, s) = testcases::two_node();
        let s = PowerInjection::new(s);
        let mut nr = NewtonRaphson::new(NewtonRaphsonConfig::default()).unwrap();
        assert!(matches!(
            nr.solve(&s, None),
            Err(PowerFlowError::Configuration(_))
        ));
        assert!(nr.set_node_types(&types).is_err());
        nr.set_admittance_matrix(y).unwrap();
        assert!(nr.set_target_voltages(DVector::zeros(3)).is_err());
        nr.set_node_types(&types).unwrap();
        assert!(nr.solve(&s, None).is_err());
        nr.set_target_voltages(v_target).unwrap();

        let short = PowerInjection::new(DVector::zeros(1));
        assert!(matches!(
            nr.solve(&short, None),
            Err(PowerFlowError::Configuration(_))
        ));
        let caps = s
            .clone()
            .with_capabilities(DVector::zeros(2), DVector::zeros(3));
        assert!(nr.solve(&caps, None).is_err());
        let start = DVector::from_element(3, c(1.0, 0.0));
        assert!(nr.solve(&s, Some(&start)).is_err());
        assert!(nr.solve(&s, None).unwrap().is_valid());
    }

    #[test]
    fn test_replaced_admittance_needs_new_node_types() {
        let (mut nr, s) = setup(testcases::two_node());
        nr.set_admittance_matrix(testcases::ring_network(4)).unwrap();
        assert!(nr.admittance_changed());
        assert!(matches!(
            nr.solve(&s, None),
            Err(PowerFlowError::Configuration(_))
        ));
    }

    #[test]
    fn test_two_slack_nodes() {
        let (y, _, v_target, s) = testcases::three_node();
        let mut nr = NewtonRaphson::new(NewtonRaphsonConfig::default()).unwrap();
        nr.set_admittance_matrix(y).unwrap();
        let diagnostics = nr
            .set_node_types(&[NodeType::Slack, NodeType::Slack, NodeType::PQ])
            .unwrap();
        assert_eq!(
            diagnostics,
            vec![Diagnostic::MultipleSlackNodes {
                chosen: 0,
                ignored: vec![1]
            }]
        );
        nr.set_target_voltages(v_target).unwrap();
        let res = nr.solve(&PowerInjection::new(s), None).unwrap();
        assert!(res.is_valid());
        assert!((res.voltages()[1].norm() - 1.02).abs() < 1e-6);
    }

    #[test]
    fn test_prediction_from_last_jacobian() {
        let (y, types, v_target, s) = testcases::three_node();
        let (mut nr, injection) = setup((y, types, v_target, s.clone()));
        assert!(!nr.can_linearize());
        let res = nr.solve(&injection, None).unwrap();
        assert!(nr.can_linearize());

        let s2 = s.map(|s| s * 1.03);
        let delta_s = &s2 + res.iterated_power();
        let predicted = nr.predict_voltage(&delta_s, res.voltages()).unwrap();
        let exact = nr.solve(&PowerInjection::new(s2), None).unwrap();
        let before = (res.voltages() - exact.voltages()).norm();
        let after = (&predicted - exact.voltages()).norm();
        assert!(after < before / 10.0, "{after} vs {before}");

        nr.set_admittance_matrix(testcases::ring_network(3)).unwrap();
        assert!(!nr.can_linearize());
        assert!(matches!(
            nr.predict_voltage(&delta_s, res.voltages()),
            Err(PowerFlowError::Configuration(_))
        ));
    }

    #[cfg(feature = "rsparse")]
    #[test]
    fn test_rsparse_backend() {
        let (y, types, v_target, s) = testcases::three_node();
        let mut nr = NewtonRaphson::with_solver(
            NewtonRaphsonConfig::default(),
            crate::basic::solver::RSparseSolver::default(),
        )
        .unwrap();
        nr.set_admittance_matrix(y).unwrap();
        nr.set_node_types(&types).unwrap();
        nr.set_target_voltages(v_target).unwrap();
        let res = nr.solve(&PowerInjection::new(s), None).unwrap();
        assert!(res.is_valid());
        assert_eq!(res.iterations(), 4);
    }
}
