use serde::{Deserialize, Serialize};

use super::error::{PowerFlowError, Result};

/// Iteration settings of the Newton-Raphson solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonRaphsonConfig {
    /// Convergence threshold on the infinity norm of the active and reactive
    /// power mismatch.
    pub epsilon: f64,
    /// Maximum number of iterations per solve.
    pub max_iterations: usize,
}

impl Default for NewtonRaphsonConfig {
    fn default() -> Self {
        Self {
            epsilon: 1e-6,
            max_iterations: 50,
        }
    }
}

impl NewtonRaphsonConfig {
    pub fn new(epsilon: f64, max_iterations: usize) -> Self {
        Self {
            epsilon,
            max_iterations,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(PowerFlowError::config(format!(
                "The convergence threshold has to be a positive number, got {}.",
                self.epsilon
            )));
        }
        if self.max_iterations == 0 {
            return Err(PowerFlowError::config(
                "The maximum amount of iterations has to be at least one.",
            ));
        }
        Ok(())
    }
}

/// Guards deciding whether a previous solution may seed the next solve.
///
/// All thresholds are relative deviations (`0.1` = 10 %). A guard trips only
/// if a deviation strictly exceeds its threshold; a deviation equal to the
/// threshold is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmStartConfig {
    /// Maximum relative nodal power deviation from the last solved state.
    pub power_deviation_threshold: f64,
    /// Maximum relative deviation of the predicted voltage magnitude (and,
    /// for logging only, angle) from the last solved voltage.
    pub voltage_deviation_threshold: f64,
}

impl Default for WarmStartConfig {
    fn default() -> Self {
        Self {
            power_deviation_threshold: 0.1,
            voltage_deviation_threshold: 0.1,
        }
    }
}

impl WarmStartConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, t) in [
            ("power", self.power_deviation_threshold),
            ("voltage", self.voltage_deviation_threshold),
        ] {
            if !(t.is_finite() && t >= 0.0) {
                return Err(PowerFlowError::config(format!(
                    "The {name} deviation threshold has to be a non-negative number, got {t}."
                )));
            }
        }
        Ok(())
    }
}
