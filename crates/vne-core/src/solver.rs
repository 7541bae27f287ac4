//! The contract between mapping algorithms and an LP/MILP solver, and the solver-agnostic models
//! handed across it.

mod models;

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::str::FromStr;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::network::{NodeId, VLinkId, VNodeId};

pub use models::ModelWeights;

/// An interface for LP/MILP solvers. Implementations must create their solver state per call,
/// so that concurrent trials can share one solver value.
pub trait LpSolver: fmt::Debug + Send + Sync {
    /// Solves `model`. Infeasibility and timeouts are reported through the outcome; an `Err` means
    /// the solver itself failed.
    fn solve(&self, model: &LpModel, mode: SolveMode) -> Result<SolverOutcome, SolverError>;
}

impl<T: LpSolver + ?Sized> LpSolver for &T {
    fn solve(&self, model: &LpModel, mode: SolveMode) -> Result<SolverOutcome, SolverError> {
        (**self).solve(model, mode)
    }
}

impl<T: LpSolver + ?Sized> LpSolver for Arc<T> {
    fn solve(&self, model: &LpModel, mode: SolveMode) -> Result<SolverOutcome, SolverError> {
        (**self).solve(model, mode)
    }
}

impl<T: LpSolver + ?Sized> LpSolver for Box<T> {
    fn solve(&self, model: &LpModel, mode: SolveMode) -> Result<SolverOutcome, SolverError> {
        (**self).solve(model, mode)
    }
}

/// A solver that is never available. Useful for running heuristics where no solver is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSolver;

impl LpSolver for NoSolver {
    fn solve(&self, _: &LpModel, _: SolveMode) -> Result<SolverOutcome, SolverError> {
        Err(SolverError::Unavailable("no solver configured".into()))
    }
}

/// Whether integrality constraints are honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum SolveMode {
    /// Linear relaxation: every variable is continuous within its bounds.
    Relaxed,
    /// Mixed-integer solve.
    Integer,
}

/// Termination status of a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SolverStatus {
    Optimal,
    Infeasible,
    Unbounded,
    TimedOut,
}

/// What a solver returns.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SolverOutcome {
    pub status: SolverStatus,
    pub feasible: bool,
    /// Variable name to value. Empty unless `feasible`.
    pub assignment: BTreeMap<String, f64>,
    pub objective: Option<f64>,
}

impl SolverOutcome {
    pub fn optimal(assignment: BTreeMap<String, f64>, objective: f64) -> Self {
        Self {
            status: SolverStatus::Optimal,
            feasible: true,
            assignment,
            objective: Some(objective),
        }
    }

    /// An outcome without a solution.
    pub fn without_solution(status: SolverStatus) -> Self {
        Self {
            status,
            feasible: false,
            assignment: BTreeMap::new(),
            objective: None,
        }
    }

    /// Node assignment values of the relaxed node-mapping model, keyed by (virtual, substrate).
    pub fn lambda(&self) -> BTreeMap<(VNodeId, NodeId), f64> {
        self.pairs("lambda")
    }

    /// Node assignment values of the exact model, keyed by (virtual, substrate).
    pub fn x(&self) -> BTreeMap<(VNodeId, NodeId), f64> {
        self.pairs("x")
    }

    /// Flow values keyed by (virtual link, from, to).
    pub fn flow(&self) -> BTreeMap<(VLinkId, NodeId, NodeId), f64> {
        self.vars("flow")
            .filter_map(|(name, value)| match name.indices[..] {
                [l, i, j] => Some(((VLinkId::new(l), NodeId::new(i), NodeId::new(j)), value)),
                _ => None,
            })
            .collect()
    }

    fn pairs(&self, prefix: &str) -> BTreeMap<(VNodeId, NodeId), f64> {
        self.vars(prefix)
            .filter_map(|(name, value)| match name.indices[..] {
                [v, s] => Some(((VNodeId::new(v), NodeId::new(s)), value)),
                _ => None,
            })
            .collect()
    }

    fn vars<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (VarName, f64)> + 'a {
        self.assignment.iter().filter_map(move |(name, &value)| {
            let name = VarName::parse(name)?;
            (name.prefix == prefix).then_some((name, value))
        })
    }
}

/// A structured variable name of the form `prefix[i,j,...]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VarName {
    pub prefix: String,
    pub indices: Vec<usize>,
}

impl VarName {
    pub fn new(prefix: impl Into<String>, indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            prefix: prefix.into(),
            indices: indices.into_iter().collect(),
        }
    }

    /// Parses `prefix[i,j,...]`. Returns `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        let (prefix, rest) = s.split_once('[')?;
        let inner = rest.strip_suffix(']')?;
        if prefix.is_empty() || inner.is_empty() {
            return None;
        }
        let indices = inner
            .split(',')
            .map(|i| usize::from_str(i.trim()).ok())
            .collect::<Option<Vec<_>>>()?;
        Some(Self::new(prefix, indices))
    }
}

impl fmt::Display for VarName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.prefix)?;
        for (n, i) in self.indices.iter().enumerate() {
            if n > 0 {
                f.write_char(',')?;
            }
            write!(f, "{i}")?;
        }
        f.write_char(']')
    }
}

/// A decision variable.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Variable {
    pub name: String,
    pub lower: f64,
    pub upper: Option<f64>,
    pub integer: bool,
}

impl Variable {
    fn is_binary(&self) -> bool {
        self.integer && self.lower == 0.0 && self.upper == Some(1.0)
    }
}

/// The relation of a linear constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Relation {
    Le,
    Eq,
    Ge,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Relation::Le => "<=",
            Relation::Eq => "=",
            Relation::Ge => ">=",
        })
    }
}

/// `Σ coef * var (relation) rhs`. Terms refer to variables by index.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Constraint {
    pub name: String,
    pub terms: Vec<(usize, f64)>,
    pub relation: Relation,
    pub rhs: f64,
}

/// A minimization problem with linear constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LpModel {
    name: String,
    variables: Vec<Variable>,
    index: FxHashMap<String, usize>,
    constraints: Vec<Constraint>,
    objective: Vec<(usize, f64)>,
}

impl LpModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a variable and returns its index. Adding a name twice returns the existing index.
    pub fn add_var(
        &mut self,
        name: impl fmt::Display,
        lower: f64,
        upper: Option<f64>,
        integer: bool,
    ) -> usize {
        let name = name.to_string();
        if let Some(&idx) = self.index.get(&name) {
            return idx;
        }
        let idx = self.variables.len();
        self.index.insert(name.clone(), idx);
        self.variables.push(Variable {
            name,
            lower,
            upper,
            integer,
        });
        idx
    }

    pub fn var_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn add_constraint(
        &mut self,
        name: impl fmt::Display,
        terms: Vec<(usize, f64)>,
        relation: Relation,
        rhs: f64,
    ) {
        self.constraints.push(Constraint {
            name: name.to_string(),
            terms,
            relation,
            rhs,
        });
    }

    /// Sets the objective to minimize.
    pub fn set_objective(&mut self, terms: Vec<(usize, f64)>) {
        self.objective = terms;
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn objective(&self) -> &[(usize, f64)] {
        &self.objective
    }

    /// Evaluates the objective at `values` (indexed like `variables()`).
    pub fn objective_value(&self, values: &[f64]) -> f64 {
        self.objective
            .iter()
            .map(|&(i, c)| c * values.get(i).copied().unwrap_or(0.0))
            .sum()
    }

    /// Renders the model in CPLEX LP format.
    pub fn to_lp_string(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "\\ {}", self.name);
        s.push_str("Minimize\n obj:");
        self.write_terms(&mut s, &self.objective);
        s.push_str("\nSubject To\n");
        for c in &self.constraints {
            let _ = write!(s, " {}:", c.name);
            self.write_terms(&mut s, &c.terms);
            let _ = writeln!(s, " {} {}", c.relation, c.rhs);
        }
        let bounded = self
            .variables
            .iter()
            .filter(|v| !v.is_binary() && (v.lower != 0.0 || v.upper.is_some()))
            .collect::<Vec<_>>();
        if !bounded.is_empty() {
            s.push_str("Bounds\n");
            for v in bounded {
                match v.upper {
                    Some(u) => writeln!(s, " {} <= {} <= {}", v.lower, v.name, u),
                    None => writeln!(s, " {} >= {}", v.name, v.lower),
                }
                .ok();
            }
        }
        for (header, pick) in [
            ("Generals", (|v: &Variable| v.integer && !v.is_binary()) as fn(&Variable) -> bool),
            ("Binary", |v: &Variable| v.is_binary()),
        ] {
            let names = self
                .variables
                .iter()
                .filter(|v| pick(v))
                .collect::<Vec<_>>();
            if !names.is_empty() {
                let _ = writeln!(s, "{header}");
                for v in names {
                    let _ = writeln!(s, " {}", v.name);
                }
            }
        }
        s.push_str("End\n");
        s
    }

    fn write_terms(&self, s: &mut String, terms: &[(usize, f64)]) {
        for (n, &(i, c)) in terms.iter().enumerate() {
            let name = &self.variables[i].name;
            let sign = if c < 0.0 { "-" } else { "+" };
            let coef = match c.abs() {
                a if a == 1.0 => String::new(),
                a => format!("{a} "),
            };
            if n == 0 && c >= 0.0 {
                let _ = write!(s, " {coef}{name}");
            } else {
                let _ = write!(s, " {sign} {coef}{name}");
            }
        }
    }
}

/// Solver failures. Infeasibility is not an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolverError {
    /// The solver cannot be used at all (e.g. a missing native library).
    #[error("Solver unavailable: {0}")]
    Unavailable(String),

    /// The backend reported an error while solving.
    #[error("Solver backend error: {0}")]
    Backend(String),

    /// The solve thread went away without reporting.
    #[error("Solver crashed")]
    Crashed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_names_parse() {
        let name = VarName::parse("flow[0,1,2]").unwrap();
        assert_eq!(name, VarName::new("flow", [0, 1, 2]));
        assert_eq!(name.to_string(), "flow[0,1,2]");
        assert_eq!(VarName::parse("x[3, 4]"), Some(VarName::new("x", [3, 4])));
        assert_eq!(VarName::parse("lambda"), None);
        assert_eq!(VarName::parse("x[]"), None);
        assert_eq!(VarName::parse("x[a,1]"), None);
        assert_eq!(VarName::parse("x[1"), None);
    }

    #[test]
    fn outcome_views_split_by_prefix() {
        let assignment = [
            ("x[0,1]", 1.0),
            ("x[1,0]", 1.0),
            ("flow[0,1,0]", 1.0),
            ("lambda[0,0]", 0.25),
            ("junk", 3.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let outcome = SolverOutcome::optimal(assignment, 1.0);
        assert_eq!(outcome.x().len(), 2);
        assert_eq!(outcome.x()[&(VNodeId::new(0), NodeId::new(1))], 1.0);
        assert_eq!(outcome.lambda()[&(VNodeId::new(0), NodeId::new(0))], 0.25);
        assert_eq!(
            outcome.flow().keys().copied().collect::<Vec<_>>(),
            vec![(VLinkId::new(0), NodeId::new(1), NodeId::new(0))]
        );
    }

    #[test]
    fn duplicate_variables_share_an_index() {
        let mut model = LpModel::new("m");
        let a = model.add_var("x[0,0]", 0.0, Some(1.0), true);
        let b = model.add_var("x[0,0]", 0.0, Some(1.0), true);
        assert_eq!(a, b);
        assert_eq!(model.variables().len(), 1);
        model.set_objective(vec![(a, 2.0)]);
        assert_eq!(model.objective_value(&[0.5]), 1.0);
    }

    #[test]
    fn lp_text_lists_sections() {
        let mut model = LpModel::new("tiny");
        let x = model.add_var("x[0,0]", 0.0, Some(1.0), true);
        let y = model.add_var("y[0]", 0.0, Some(4.0), false);
        let z = model.add_var("z[0]", 0.0, None, true);
        model.add_constraint("c[0]", vec![(x, 1.0), (y, -2.5), (z, 1.0)], Relation::Ge, 1.0);
        model.set_objective(vec![(x, 3.0), (y, 1.0)]);
        insta::assert_snapshot!(model.to_lp_string(), @r###"
        \ tiny
        Minimize
         obj: 3 x[0,0] + y[0]
        Subject To
         c[0]: x[0,0] - 2.5 y[0] + z[0] >= 1
        Bounds
         0 <= y[0] <= 4
        Generals
         z[0]
        Binary
         x[0,0]
        End
        "###);
    }

    #[test]
    fn no_solver_is_unavailable() {
        let res = NoSolver.solve(&LpModel::new("m"), SolveMode::Relaxed);
        assert!(matches!(res, Err(SolverError::Unavailable(..))));
    }
}
