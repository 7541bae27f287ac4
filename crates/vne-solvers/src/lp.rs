//! A solver backed by `good_lp` with the pure-Rust `microlp` backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use good_lp::{
    constraint, microlp, variable, Expression, ProblemVariables, ResolutionError, Solution,
    SolverModel, Variable,
};
use vne_core::solver::{
    LpModel, LpSolver, Relation, SolveMode, SolverError, SolverOutcome, SolverStatus,
};

/// Solver options.
#[derive(Debug, Clone, Copy, typed_builder::TypedBuilder)]
pub struct SolverOpts {
    /// Wall-clock limit of one solve. `None` solves on the calling thread and waits indefinitely.
    ///
    /// `microlp` cannot be interrupted: a solve that times out is abandoned, not stopped, and
    /// its thread keeps running until the solve finishes.
    #[builder(default = Some(Duration::from_secs(60)))]
    pub timeout: Option<Duration>,
    /// Limit on solver threads alive at once, abandoned ones included. Past it, solves run on
    /// the calling thread without a timeout.
    #[builder(default = 64)]
    pub max_threads: usize,
}

impl Default for SolverOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Solves models with `microlp`. Every timed call builds a fresh problem on its own thread, so
/// one value can serve concurrent trials. Clones share the thread count.
#[derive(Debug, Clone, Default, derive_new::new)]
pub struct GoodLpSolver {
    opts: SolverOpts,
    #[new(default)]
    threads: Arc<AtomicUsize>,
}

impl GoodLpSolver {
    /// The solver's options.
    pub fn opts(&self) -> &SolverOpts {
        &self.opts
    }

    /// Solver threads currently alive.
    pub fn threads(&self) -> usize {
        self.threads.load(Ordering::SeqCst)
    }

    /// Takes a thread slot, or returns `None` if every slot is in use.
    fn slot(&self) -> Option<ThreadSlot> {
        let taken = self.threads.fetch_add(1, Ordering::SeqCst);
        let slot = ThreadSlot(Arc::clone(&self.threads));
        (taken < self.opts.max_threads).then_some(slot)
    }
}

/// A claimed solver thread. Dropping it frees the slot.
#[derive(Debug)]
struct ThreadSlot(Arc<AtomicUsize>);

impl Drop for ThreadSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl LpSolver for GoodLpSolver {
    fn solve(&self, model: &LpModel, mode: SolveMode) -> Result<SolverOutcome, SolverError> {
        log::debug!(
            "solving {} ({} variables, {} constraints, {mode:?})",
            model.name(),
            model.variables().len(),
            model.constraints().len()
        );
        let Some(timeout) = self.opts.timeout else {
            return solve_now(model, mode);
        };
        let Some(slot) = self.slot() else {
            log::warn!(
                "{} solver thread(s) busy, solving {} without a timeout",
                self.opts.max_threads,
                model.name()
            );
            return solve_now(model, mode);
        };
        let (s, r) = crossbeam_channel::bounded(1);
        let owned = model.clone();
        thread::Builder::new()
            .name(format!("solve {}", model.name()))
            .spawn(move || {
                let _slot = slot;
                // The caller may have stopped waiting
                let _ = s.send(solve_now(&owned, mode));
            })
            .map_err(|e| SolverError::Backend(e.to_string()))?;
        match r.recv_timeout(timeout) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("{} timed out after {timeout:?}", model.name());
                Ok(SolverOutcome::without_solution(SolverStatus::TimedOut))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SolverError::Crashed),
        }
    }
}

fn solve_now(model: &LpModel, mode: SolveMode) -> Result<SolverOutcome, SolverError> {
    if model.variables().is_empty() {
        return Ok(solve_constant(model));
    }
    let mut problem = ProblemVariables::new();
    let vars = model
        .variables()
        .iter()
        .map(|v| {
            let mut def = variable().min(v.lower);
            if let Some(upper) = v.upper {
                def = def.max(upper);
            }
            if v.integer && mode == SolveMode::Integer {
                def = def.integer();
            }
            problem.add(def.name(v.name.clone()))
        })
        .collect::<Vec<_>>();
    let objective = expression(&vars, model.objective());
    let mut lp = problem.minimise(objective).using(microlp);
    for c in model.constraints() {
        let lhs = expression(&vars, &c.terms);
        lp.add_constraint(match c.relation {
            Relation::Le => constraint::leq(lhs, c.rhs),
            Relation::Eq => constraint::eq(lhs, c.rhs),
            Relation::Ge => constraint::geq(lhs, c.rhs),
        });
    }
    match lp.solve() {
        Ok(solution) => {
            let values = vars.iter().map(|&v| solution.value(v)).collect::<Vec<_>>();
            let objective = model.objective_value(&values);
            let assignment = model
                .variables()
                .iter()
                .zip(values)
                .map(|(v, value)| (v.name.clone(), value))
                .collect::<BTreeMap<_, _>>();
            Ok(SolverOutcome::optimal(assignment, objective))
        }
        Err(ResolutionError::Infeasible) => {
            Ok(SolverOutcome::without_solution(SolverStatus::Infeasible))
        }
        Err(ResolutionError::Unbounded) => {
            Ok(SolverOutcome::without_solution(SolverStatus::Unbounded))
        }
        Err(e) => Err(SolverError::Backend(e.to_string())),
    }
}

fn expression(vars: &[Variable], terms: &[(usize, f64)]) -> Expression {
    terms.iter().map(|&(i, coef)| coef * vars[i]).sum()
}

/// A model without variables is feasible iff every constraint holds at zero.
fn solve_constant(model: &LpModel) -> SolverOutcome {
    let holds = model.constraints().iter().all(|c| match c.relation {
        Relation::Le => 0.0 <= c.rhs,
        Relation::Eq => c.rhs == 0.0,
        Relation::Ge => 0.0 >= c.rhs,
    });
    if holds {
        SolverOutcome::optimal(BTreeMap::new(), 0.0)
    } else {
        SolverOutcome::without_solution(SolverStatus::Infeasible)
    }
}
