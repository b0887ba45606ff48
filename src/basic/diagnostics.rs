use std::fmt;

use serde::Serialize;

/// Non-fatal findings surfaced while configuring or warm-starting a solve.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// More than one slack node was supplied; the lowest index is used and
    /// the others are treated as PV nodes.
    MultipleSlackNodes { chosen: usize, ignored: Vec<usize> },
    /// Relative nodal power deviation from the last solved state above the guard.
    PowerDeviation { node: usize, ratio: f64, threshold: f64 },
    /// Predicted voltage angle deviates from the last solved angle. Logged only.
    AngleDeviation { node: usize, ratio: f64, threshold: f64 },
    /// Predicted voltage magnitude deviates from the last solved magnitude.
    MagnitudeDeviation { node: usize, ratio: f64, threshold: f64 },
    /// The start voltage could not be predicted from the cached Jacobian.
    PredictionFailed { reason: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::MultipleSlackNodes { chosen, ignored } => write!(
                f,
                "more than one slack node, using node {chosen} and ignoring {ignored:?}"
            ),
            Diagnostic::PowerDeviation {
                node,
                ratio,
                threshold,
            } => write!(
                f,
                "nodal power at node {node} deviates by {:.1} % (limit {:.1} %)",
                ratio * 100.0,
                threshold * 100.0
            ),
            Diagnostic::AngleDeviation {
                node,
                ratio,
                threshold,
            } => write!(
                f,
                "predicted voltage angle at node {node} deviates by {:.1} % (limit {:.1} %)",
                ratio * 100.0,
                threshold * 100.0
            ),
            Diagnostic::MagnitudeDeviation {
                node,
                ratio,
                threshold,
            } => write!(
                f,
                "predicted voltage magnitude at node {node} deviates by {:.1} % (limit {:.1} %)",
                ratio * 100.0,
                threshold * 100.0
            ),
            Diagnostic::PredictionFailed { reason } => {
                write!(f, "start voltage prediction failed: {reason}")
            }
        }
    }
}
