//! Numeric constants shared by the resource model, the search routines and the solver adapter.

/// Tolerance used whenever two resource amounts are compared.
pub const EPSILON: f64 = 1e-9;

/// Number of candidate paths the partitioned mapping asks its inner greedy mapping for.
pub const INNER_K: usize = 50;

/// Hop bound used by the inner greedy mapping of the partitioned mapping.
pub const INNER_MAX_DISTANCE: usize = 35;

/// Floor applied to residual capacities in the denominators of the embedding models' objective.
pub const SOLVER_DELTA: f64 = 1e-6;

/// Flow fractions below this are treated as zero when decoding a solver solution.
pub const FLOW_TOLERANCE: f64 = 1e-6;
