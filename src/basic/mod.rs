pub(crate) mod admittance;
pub(crate) mod config;
pub(crate) mod deviation;
pub(crate) mod diagnostics;
pub(crate) mod error;
pub(crate) mod evaluation;
pub(crate) mod jacobian;
pub(crate) mod newtonpf;
pub(crate) mod node;
pub mod solver;
pub(crate) mod warm_start;

pub use admittance::AdmittanceMatrix;
pub use config::{NewtonRaphsonConfig, WarmStartConfig};
pub use deviation::{DeviationVector, reduce_deviation_vector};
pub use diagnostics::Diagnostic;
pub use error::{PowerFlowError, Result, SolveError};
pub use evaluation::{IterationEvaluation, PowerFlowResult, RunEvaluation, Termination};
pub use jacobian::{PartialDerivatives, build_reduced_jacobian, partial_derivatives};
pub use newtonpf::{
    IterationStep, NewtonRaphson, PowerFlowAlgorithm, PowerInjection, StepOutcome, StepStatus,
    apply_correction_to_voltages, iterated_power,
};
pub use node::{NodeClassification, NodeType};
pub use warm_start::{StartKind, WarmStart};
