//! Newton-Raphson power flow in rectangular coordinates with warm starts.
//!
//! [`prelude::NewtonRaphson`] solves the nodal power balance of a network
//! given by its admittance matrix, node types and target voltages.
//! [`prelude::WarmStart`] wraps it to seed consecutive solves with a
//! voltage predicted from the previous solution.

mod basic;
pub mod testcases;
pub mod prelude {
    use crate::basic;
    pub use basic::*;
}
