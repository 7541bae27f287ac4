#![warn(unreachable_pub, missing_debug_implementations)]

//! The core virtual network embedding library. A [`Scenario`] describes a substrate, a sequence
//! of virtual network requests and a parameter space; an [`Experiment`] runs one trial per
//! parameter set, mapping every request with the configured [algorithm](mapping::MappingAlgo).

#[macro_use]
mod ident;

pub mod constants;
pub mod cost;
pub mod embedding;
pub mod experiment;
pub mod mapping;
pub mod network;
pub mod params;
pub mod resource;
pub mod scenario;
pub mod search;
pub mod solver;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use embedding::{Embedding, LinkRoute};
pub use experiment::{Experiment, ExperimentError, TrialId, TrialMetrics, TrialOutcome, TrialReport};
pub use mapping::{MappingAlgo, MappingError, Outcome, RejectReason};
pub use network::{NetworkStack, SubstrateNetwork, TopologyError, VirtualNetwork};
pub use params::{AlgoConfig, AlgoKind, ConfigError, ParamSet, ParamSpace, ParamValue};
pub use scenario::{Request, Scenario, ScenarioError, ValidScenario};
pub use solver::{LpModel, LpSolver, NoSolver, SolveMode, SolverError, SolverOutcome, SolverStatus};
