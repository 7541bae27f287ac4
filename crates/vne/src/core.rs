//! Core data structures, traits, and routines. The most common entry point is
//! [`Experiment::run()`](experiment::Experiment::run), which runs every trial of a
//! [validated scenario](scenario::ValidScenario).

pub use vne_core::*;
