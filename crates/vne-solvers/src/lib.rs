//! This crate contains implementations of the [`LpSolver`](vne_core::solver::LpSolver) trait.
//! The types here bridge the embedding models and backend LP/MILP solvers.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

pub mod lp;

pub use crate::lp::{GoodLpSolver, SolverOpts};
