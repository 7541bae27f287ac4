//! Utilities for running experiments from scenario files.

pub use vne_utils::*;
