use std::time::Duration;

use vne_core::mapping::{MappingAlgo, MathProg, MathProgMode, MathProgOpts, Outcome, RejectReason};
use vne_core::network::{NodeId, ResourceKind, VNodeId, VnId};
use vne_core::solver::{LpModel, LpSolver, Relation, SolveMode, SolverStatus};
use vne_core::testing;
use vne_solvers::{GoodLpSolver, SolverOpts};

fn small_model() -> LpModel {
    // min x + y  s.t.  x + y >= 2.5,  x <= 1.5
    let mut model = LpModel::new("small");
    let x = model.add_var("x[0]", 0.0, None, true);
    let y = model.add_var("x[1]", 0.0, None, true);
    model.add_constraint("cover", vec![(x, 1.0), (y, 1.0)], Relation::Ge, 2.5);
    model.add_constraint("cap", vec![(x, 1.0)], Relation::Le, 1.5);
    model.set_objective(vec![(x, 1.0), (y, 1.0)]);
    model
}

#[test]
fn relaxation_ignores_integrality() -> anyhow::Result<()> {
    let outcome = GoodLpSolver::default().solve(&small_model(), SolveMode::Relaxed)?;
    assert_eq!(outcome.status, SolverStatus::Optimal);
    assert!((outcome.objective.unwrap() - 2.5).abs() < 1e-6);
    Ok(())
}

#[test]
fn integer_solve_rounds_up() -> anyhow::Result<()> {
    let outcome = GoodLpSolver::default().solve(&small_model(), SolveMode::Integer)?;
    assert!(outcome.feasible);
    assert!((outcome.objective.unwrap() - 3.0).abs() < 1e-6);
    for value in outcome.assignment.values() {
        assert!((value - value.round()).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn infeasible_model_has_no_solution() -> anyhow::Result<()> {
    let mut model = LpModel::new("infeasible");
    let x = model.add_var("x[0]", 0.0, Some(1.0), false);
    model.add_constraint("c", vec![(x, 1.0)], Relation::Ge, 2.0);
    model.set_objective(vec![(x, 1.0)]);
    let outcome = GoodLpSolver::default().solve(&model, SolveMode::Relaxed)?;
    assert_eq!(outcome.status, SolverStatus::Infeasible);
    assert!(!outcome.feasible);
    assert!(outcome.assignment.is_empty());
    Ok(())
}

#[test]
fn empty_model_is_trivially_feasible() -> anyhow::Result<()> {
    let solver = GoodLpSolver::new(SolverOpts::builder().timeout(None).build());
    let outcome = solver.solve(&LpModel::new("empty"), SolveMode::Integer)?;
    assert_eq!(outcome.objective, Some(0.0));
    Ok(())
}

#[test]
fn busy_solver_falls_back_to_the_calling_thread() -> anyhow::Result<()> {
    // No thread may be spawned, so even a zero timeout cannot abandon the solve
    let solver = GoodLpSolver::new(
        SolverOpts::builder()
            .timeout(Some(Duration::ZERO))
            .max_threads(0)
            .build(),
    );
    let outcome = solver.solve(&small_model(), SolveMode::Relaxed)?;
    assert_eq!(outcome.status, SolverStatus::Optimal);
    assert!((outcome.objective.unwrap() - 2.5).abs() < 1e-6);
    assert_eq!(solver.threads(), 0);
    Ok(())
}

#[test]
fn exact_mapping_runs() -> anyhow::Result<()> {
    let mut substrate = testing::two_node_substrate();
    let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
    let algo = MathProg::new(MathProgOpts::default(), GoodLpSolver::default());
    let outcome = algo.map_network(&mut substrate, &vn)?;
    let embedding = outcome.embedding().unwrap();
    let a = embedding.nodes[&VNodeId::new(0)];
    let b = embedding.nodes[&VNodeId::new(1)];
    assert_ne!(a, b);
    assert!(embedding.objective.unwrap() > 0.0);
    assert_eq!(embedding.cost(), 13.0);
    Ok(())
}

#[test]
fn rounded_mapping_runs() -> anyhow::Result<()> {
    let mut substrate = testing::line_substrate(3, 10.0, 10.0);
    let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
    let opts = MathProgOpts::builder()
        .mode(MathProgMode::Rounded {
            randomized: false,
            seed: 0,
        })
        .build();
    let algo = MathProg::new(opts, GoodLpSolver::default());
    let outcome = algo.map_network(&mut substrate, &vn)?;
    let embedding = outcome.embedding().unwrap();
    let hosts = embedding.nodes.values().copied().collect::<Vec<_>>();
    assert_eq!(hosts.len(), 2);
    assert_ne!(hosts[0], hosts[1]);
    assert!(hosts.iter().all(|n| n.inner() < 3));
    Ok(())
}

#[test]
fn oversubscribed_link_is_rejected_without_side_effects() -> anyhow::Result<()> {
    let mut substrate = testing::two_node_substrate();
    let before = substrate.residual_state();
    let vn = testing::pair_request(VnId::ZERO, 4.0, 20.0);
    let algo = MathProg::new(MathProgOpts::default(), GoodLpSolver::default());
    let outcome = algo.map_network(&mut substrate, &vn)?;
    assert_eq!(outcome, Outcome::Rejected(RejectReason::SolverInfeasible));
    assert_eq!(substrate.residual_state(), before);
    assert_eq!(substrate.node_available(NodeId::ZERO, ResourceKind::Cpu), 10.0);
    Ok(())
}
