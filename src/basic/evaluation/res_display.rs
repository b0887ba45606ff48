use std::fmt;
use tabled::Tabled;

use super::IterationEvaluation;

/// A wrapper around a float that limits the number of decimal places when printed.
#[derive(Clone, Copy, PartialEq, PartialOrd)]
pub(crate) struct FloatWrapper {
    pub(crate) value: f64,
    pub(crate) precision: usize, // Number of decimal places to display
    pub(crate) scientific: bool,
}

impl FloatWrapper {
    /// Creates a new `FloatWrapper` with the given value and precision.
    pub fn new(value: f64, precision: usize) -> Self {
        FloatWrapper {
            value,
            precision,
            scientific: false,
        }
    }

    /// Same as [`FloatWrapper::new`] but printed in exponent notation.
    pub fn sci(value: f64, precision: usize) -> Self {
        FloatWrapper {
            value,
            precision,
            scientific: true,
        }
    }
}

impl fmt::Display for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scientific {
            write!(f, "{:.1$e}", self.value, self.precision)
        } else {
            write!(f, "{:.1$}", self.value, self.precision)
        }
    }
}

impl fmt::Debug for FloatWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Table row for one iteration of the trace.
#[derive(Debug, Tabled)]
#[allow(non_snake_case)]
pub(crate) struct IterationResTable {
    pub(crate) It: usize,
    pub(crate) Success: bool,
    pub(crate) dP_max: FloatWrapper,
    pub(crate) dQ_max: FloatWrapper,
    pub(crate) dV2_max: FloatWrapper,
    pub(crate) dE_max: FloatWrapper,
    pub(crate) dF_max: FloatWrapper,
}

impl From<&IterationEvaluation> for IterationResTable {
    fn from(it: &IterationEvaluation) -> Self {
        IterationResTable {
            It: it.index,
            Success: it.successful,
            dP_max: FloatWrapper::sci(it.delta_p_max, 5),
            dQ_max: FloatWrapper::sci(it.delta_q_max, 5),
            dV2_max: FloatWrapper::sci(it.delta_v2_max, 5),
            dE_max: FloatWrapper::sci(it.delta_e_max, 5),
            dF_max: FloatWrapper::sci(it.delta_f_max, 5),
        }
    }
}

/// Table row for display of node results.
#[derive(Debug, Tabled)]
#[allow(non_snake_case)]
pub(crate) struct NodeResTable {
    pub(crate) Node: usize,
    pub(crate) Vm: FloatWrapper,
    pub(crate) Va: FloatWrapper,
    pub(crate) P: FloatWrapper,
    pub(crate) Q: FloatWrapper,
}
