//! LP/MILP solvers for the mathematical programming mapping.

pub use vne_solvers::*;
