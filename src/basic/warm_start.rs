use nalgebra::DVector;
use num_complex::Complex64;
use serde::Serialize;
use tracing::{debug, warn};

use super::{
    config::WarmStartConfig,
    diagnostics::Diagnostic,
    error::Result,
    evaluation::PowerFlowResult,
    newtonpf::{NewtonRaphson, PowerFlowAlgorithm, PowerInjection},
    node::{NodeClassification, NodeType},
};

/// How the start voltage of the last solve was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StartKind {
    /// No solve yet.
    #[default]
    None,
    /// Start voltage supplied by the caller.
    Given,
    /// Flat start, either forced or because no reusable state existed.
    Flat,
    /// Flat start after a guard or the prediction rejected the previous state.
    Fallback,
    /// Start voltage predicted from the last solved state.
    Predicted,
}

/// Seeds each solve of `A` with a voltage predicted from the previous one.
///
/// The last solved voltages and iterated power are kept together with the
/// Jacobian inside `A`. If the new power set point is close enough, one
/// linear correction of the old voltage is used as the start voltage;
/// otherwise the solve falls back to a flat start.
pub struct WarmStart<A: PowerFlowAlgorithm = NewtonRaphson> {
    inner: A,
    config: WarmStartConfig,
    last_s: Option<DVector<Complex64>>,
    last_v: Option<DVector<Complex64>>,
    last_start: StartKind,
    diagnostics: Vec<Diagnostic>,
}

/// `|delta| / |base|` with `0/0 = 0` and `x/0 = ∞`.
fn relative(delta: f64, base: f64) -> f64 {
    if base == 0.0 {
        if delta == 0.0 { 0.0 } else { f64::INFINITY }
    } else {
        delta.abs() / base.abs()
    }
}

impl<A: PowerFlowAlgorithm> WarmStart<A> {
    pub fn new(inner: A, config: WarmStartConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner,
            config,
            last_s: None,
            last_v: None,
            last_start: StartKind::None,
            diagnostics: Vec::new(),
        })
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    /// Access to the wrapped algorithm, e.g. to replace the admittance matrix.
    pub fn inner_mut(&mut self) -> &mut A {
        &mut self.inner
    }

    pub fn into_inner(self) -> A {
        self.inner
    }

    pub fn config(&self) -> &WarmStartConfig {
        &self.config
    }

    pub fn last_start(&self) -> StartKind {
        self.last_start
    }

    /// Guard findings of the last solve.
    pub fn last_diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn last_voltages(&self) -> Option<&DVector<Complex64>> {
        self.last_v.as_ref()
    }

    /// Forgets the last solved state; the next solve starts flat.
    pub fn reset(&mut self) {
        self.last_s = None;
        self.last_v = None;
    }

    /// Solves for `injection`.
    ///
    /// An explicit `start` voltage or `force_flat_start` bypasses the
    /// prediction. Errors of the wrapped algorithm are passed through.
    pub fn solve(
        &mut self,
        injection: &PowerInjection,
        start: Option<&DVector<Complex64>>,
        force_flat_start: bool,
    ) -> Result<PowerFlowResult> {
        self.diagnostics.clear();
        let (kind, result) = if force_flat_start {
            (StartKind::Flat, self.inner.solve(injection, None))
        } else if let Some(start) = start {
            (StartKind::Given, self.inner.solve(injection, Some(start)))
        } else {
            match self.predict(injection.actual()) {
                Some(v) => {
                    debug!("Starting from predicted voltage");
                    (StartKind::Predicted, self.inner.solve(injection, Some(&v)))
                }
                None if !self.diagnostics.is_empty() => {
                    (StartKind::Fallback, self.inner.solve(injection, None))
                }
                None => (StartKind::Flat, self.inner.solve(injection, None)),
            }
        };
        self.last_start = kind;
        let result = result?;
        self.last_s = Some(result.iterated_power().clone());
        self.last_v = Some(result.voltages().clone());
        Ok(result)
    }

    /// Predicted start voltage, `None` if the last state may not be reused.
    fn predict(&mut self, actual_s: &DVector<Complex64>) -> Option<DVector<Complex64>> {
        let (last_s, last_v) = (self.last_s.as_ref()?, self.last_v.as_ref()?);
        if !self.inner.can_linearize()
            || last_s.len() != actual_s.len()
            || last_v.len() != self.inner.node_count()
        {
            return None;
        }
        let nodes = self.inner.classification()?;
        let delta_s = actual_s + last_s;
        if let Some(trip) = power_guard(
            nodes,
            &delta_s,
            last_s,
            self.config.power_deviation_threshold,
        ) {
            self.diagnostics.push(trip);
            return None;
        }
        let predicted = match self.inner.predict_voltage(&delta_s, last_v) {
            Ok(v) => v,
            Err(e) => {
                warn!("Start voltage prediction failed: {e}");
                self.diagnostics.push(Diagnostic::PredictionFailed {
                    reason: e.to_string(),
                });
                return None;
            }
        };
        let findings = voltage_guard(
            &predicted,
            last_v,
            self.config.voltage_deviation_threshold,
        );
        let rejected = findings
            .iter()
            .any(|d| matches!(d, Diagnostic::MagnitudeDeviation { .. }));
        self.diagnostics.extend(findings);
        (!rejected).then_some(predicted)
    }
}

/// First node whose specified power deviates beyond `threshold`.
///
/// The slack node is skipped and only active power counts at PV nodes, as
/// the remaining components follow from the solution.
fn power_guard(
    nodes: &NodeClassification,
    delta_s: &DVector<Complex64>,
    last_s: &DVector<Complex64>,
    threshold: f64,
) -> Option<Diagnostic> {
    for (node, &node_type) in nodes.types().iter().enumerate() {
        let delta = match node_type {
            NodeType::Slack => continue,
            NodeType::PV => delta_s[node].re,
            _ => delta_s[node].norm(),
        };
        let ratio = relative(delta, last_s[node].norm());
        if ratio > threshold {
            warn!(
                node,
                ratio, threshold, "Nodal power deviates too much from the last solve, force a flat start"
            );
            return Some(Diagnostic::PowerDeviation {
                node,
                ratio,
                threshold,
            });
        }
    }
    None
}

/// Angle findings are reported for all nodes; checking stops at the first
/// magnitude finding.
fn voltage_guard(
    predicted: &DVector<Complex64>,
    last_v: &DVector<Complex64>,
    threshold: f64,
) -> Vec<Diagnostic> {
    let mut findings = Vec::new();
    for (node, (p, l)) in predicted.iter().zip(last_v.iter()).enumerate() {
        let ratio = relative(p.arg() - l.arg(), l.arg());
        if ratio > threshold {
            warn!(node, ratio, threshold, "Predicted voltage angle deviates from the last solve");
            findings.push(Diagnostic::AngleDeviation {
                node,
                ratio,
                threshold,
            });
        }
    }
    for (node, (p, l)) in predicted.iter().zip(last_v.iter()).enumerate() {
        let ratio = relative(p.norm() - l.norm(), l.norm());
        if ratio > threshold {
            warn!(
                node,
                ratio, threshold, "Predicted voltage magnitude deviates too much, force a flat start"
            );
            findings.push(Diagnostic::MagnitudeDeviation {
                node,
                ratio,
                threshold,
            });
            break;
        }
    }
    findings
}

impl<A: PowerFlowAlgorithm> PowerFlowAlgorithm for WarmStart<A> {
    fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    fn classification(&self) -> Option<&NodeClassification> {
        self.inner.classification()
    }

    fn solve(
        &mut self,
        injection: &PowerInjection,
        start: Option<&DVector<Complex64>>,
    ) -> Result<PowerFlowResult> {
        WarmStart::solve(self, injection, start, false)
    }

    fn can_linearize(&self) -> bool {
        self.inner.can_linearize()
    }

    fn predict_voltage(
        &mut self,
        delta_s: &DVector<Complex64>,
        last_v: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>> {
        self.inner.predict_voltage(delta_s, last_v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basic::{
        NewtonRaphsonConfig, PowerFlowError, SolveError,
        solver::{LuSolver, Solve},
    };
    use nalgebra::DMatrix;
    use crate::testcases;

    /// Dense LU that fails on the `fail_at`-th call.
    struct FailingSolver {
        calls: usize,
        fail_at: usize,
    }

    impl Solve for FailingSolver {
        fn solve(
            &mut self,
            a: &DMatrix<f64>,
            b: &DVector<f64>,
        ) -> std::result::Result<DVector<f64>, SolveError> {
            self.calls += 1;
            if self.calls == self.fail_at {
                return Err(SolveError::SingularMatrix);
            }
            LuSolver.solve(a, b)
        }
    }

    fn solver(config: WarmStartConfig) -> (WarmStart, DVector<Complex64>) {
        let (y, types, v_target, s) = testcases::three_node();
        let mut nr = NewtonRaphson::new(NewtonRaphsonConfig::default()).unwrap();
        nr.set_admittance_matrix(y).unwrap();
        nr.set_node_types(&types).unwrap();
        nr.set_target_voltages(v_target).unwrap();
        (WarmStart::new(nr, config).unwrap(), s)
    }

    fn scaled(s: &DVector<Complex64>, f: f64) -> PowerInjection {
        PowerInjection::new(s.map(|s| s * f))
    }

    fn cold_reference(s: &DVector<Complex64>, f: f64) -> PowerFlowResult {
        let (mut ws, _) = solver(WarmStartConfig::default());
        ws.solve(&scaled(s, f), None, true).unwrap()
    }

    #[test]
    fn test_small_change_is_warm_started() {
        let (mut ws, s) = solver(WarmStartConfig::default());
        let first = ws.solve(&scaled(&s, 1.0), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Flat);
        assert_eq!(first.iterations(), 4);

        let warm = ws.solve(&scaled(&s, 1.03), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Predicted);
        assert!(ws.last_diagnostics().is_empty());
        assert!(warm.is_valid());

        let cold = cold_reference(&s, 1.03);
        assert_eq!(cold.iterations(), 4);
        assert_eq!(warm.iterations(), 2);
        assert!((warm.voltages() - cold.voltages()).norm() < 1e-8);
    }

    #[test]
    fn test_angle_deviation_is_reported_only() {
        let (mut ws, s) = solver(WarmStartConfig::default());
        ws.solve(&scaled(&s, 1.0), None, false).unwrap();
        let warm = ws.solve(&scaled(&s, 1.05), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Predicted);
        assert!(warm.is_valid());
        assert_eq!(warm.iterations(), 2);
        assert!(matches!(
            ws.last_diagnostics(),
            [Diagnostic::AngleDeviation { node: 1, .. }]
        ));
    }

    #[test]
    fn test_large_change_falls_back() {
        let (mut ws, s) = solver(WarmStartConfig::default());
        ws.solve(&scaled(&s, 1.0), None, false).unwrap();
        let res = ws.solve(&scaled(&s, 1.2), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Fallback);
        assert!(matches!(
            ws.last_diagnostics(),
            [Diagnostic::PowerDeviation { node: 1, .. }]
        ));
        let cold = cold_reference(&s, 1.2);
        assert_eq!(res.iterations(), cold.iterations());
        assert_eq!(res.voltages(), cold.voltages());

        // the fallback result seeds the next solve
        let next = ws.solve(&scaled(&s, 1.21), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Predicted);
        assert!(next.iterations() < cold.iterations());
    }

    #[test]
    fn test_magnitude_guard_falls_back() {
        let config = WarmStartConfig {
            voltage_deviation_threshold: 0.0,
            ..Default::default()
        };
        let (mut ws, s) = solver(config);
        ws.solve(&scaled(&s, 1.0), None, false).unwrap();
        let res = ws.solve(&scaled(&s, 1.03), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Fallback);
        assert!(
            ws.last_diagnostics()
                .iter()
                .any(|d| matches!(d, Diagnostic::MagnitudeDeviation { .. }))
        );
        assert_eq!(res.iterations(), 4);
    }

    #[test]
    fn test_failed_prediction_falls_back() {
        let (y, types, v_target, s) = testcases::three_node();
        // four solves for the first run, the fifth is the prediction
        let failing = FailingSolver {
            calls: 0,
            fail_at: 5,
        };
        let mut nr = NewtonRaphson::with_solver(NewtonRaphsonConfig::default(), failing).unwrap();
        nr.set_admittance_matrix(y).unwrap();
        nr.set_node_types(&types).unwrap();
        nr.set_target_voltages(v_target).unwrap();
        let mut ws = WarmStart::new(nr, WarmStartConfig::default()).unwrap();

        assert_eq!(ws.solve(&scaled(&s, 1.0), None, false).unwrap().iterations(), 4);
        let res = ws.solve(&scaled(&s, 1.03), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Fallback);
        assert!(matches!(
            ws.last_diagnostics(),
            [Diagnostic::PredictionFailed { .. }]
        ));
        assert!(res.is_valid());
        assert_eq!(res.iterations(), cold_reference(&s, 1.03).iterations());
    }

    #[test]
    fn test_deviation_equal_to_threshold_is_accepted() {
        let (y, types, v_target, _) = testcases::two_node();
        let mut nr = NewtonRaphson::new(NewtonRaphsonConfig::default()).unwrap();
        nr.set_admittance_matrix(y).unwrap();
        nr.set_node_types(&types).unwrap();
        nr.set_target_voltages(v_target).unwrap();
        let config = WarmStartConfig {
            power_deviation_threshold: 0.0,
            voltage_deviation_threshold: 0.0,
        };
        let mut ws = WarmStart::new(nr, config).unwrap();

        // no load: iterated power is exactly zero, so every ratio is 0/0 = 0
        let idle = PowerInjection::new(DVector::zeros(2));
        ws.solve(&idle, None, false).unwrap();
        let res = ws.solve(&idle, None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Predicted);
        assert!(ws.last_diagnostics().is_empty());
        assert_eq!(res.iterations(), 1);
    }

    #[test]
    fn test_explicit_start_and_forced_flat_start() {
        let (mut ws, s) = solver(WarmStartConfig::default());
        ws.solve(&scaled(&s, 1.0), None, false).unwrap();

        let res = ws.solve(&scaled(&s, 1.03), None, true).unwrap();
        assert_eq!(ws.last_start(), StartKind::Flat);
        assert_eq!(res.iterations(), 4);

        let start = res.voltages().clone();
        let res = ws.solve(&scaled(&s, 1.03), Some(&start), false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Given);
        assert_eq!(res.iterations(), 1);

        let res = ws.solve(&scaled(&s, 1.0), Some(&start), true).unwrap();
        assert_eq!(ws.last_start(), StartKind::Flat);
        assert_eq!(res.iterations(), 4);
    }

    #[test]
    fn test_admittance_change_disables_reuse() {
        let (mut ws, s) = solver(WarmStartConfig::default());
        ws.solve(&scaled(&s, 1.0), None, false).unwrap();
        let (y, ..) = testcases::three_node();
        ws.inner_mut().set_admittance_matrix(y).unwrap();
        let res = ws.solve(&scaled(&s, 1.03), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Flat);
        assert_eq!(res.iterations(), 4);

        let res = ws.solve(&scaled(&s, 1.06), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Predicted);
        assert_eq!(res.iterations(), 2);
    }

    #[test]
    fn test_reset_and_errors() {
        let (mut ws, s) = solver(WarmStartConfig::default());
        ws.solve(&scaled(&s, 1.0), None, false).unwrap();
        ws.reset();
        ws.solve(&scaled(&s, 1.03), None, false).unwrap();
        assert_eq!(ws.last_start(), StartKind::Flat);

        let short = PowerInjection::new(DVector::zeros(2));
        assert!(matches!(
            ws.solve(&short, None, false),
            Err(PowerFlowError::Configuration(_))
        ));
        let bad = WarmStartConfig {
            power_deviation_threshold: f64::NAN,
            ..Default::default()
        };
        let (y, ..) = testcases::three_node();
        let mut nr = NewtonRaphson::new(NewtonRaphsonConfig::default()).unwrap();
        nr.set_admittance_matrix(y).unwrap();
        assert!(WarmStart::new(nr, bad).is_err());
    }
}
