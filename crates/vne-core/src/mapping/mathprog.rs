use std::collections::BTreeMap;

use rand::prelude::*;
use rustc_hash::FxHashSet;

use crate::constants::{EPSILON, FLOW_TOLERANCE};
use crate::embedding::LinkRoute;
use crate::mapping::{
    can_host, reserve_path, transactional, Abort, MappingAlgo, MappingError, Outcome, Placement,
    RejectReason,
};
use crate::network::{
    LinkId, NodeId, ResourceKind, SubstrateNetwork, Transaction, VLinkId, VNodeId, VirtualNetwork,
};
use crate::resource::Target;
use crate::search::{FlowPart, Path};
use crate::solver::{LpModel, LpSolver, ModelWeights, SolveMode, SolverOutcome, SolverStatus};

/// How the models are solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathProgMode {
    /// One joint MIP, preceded by its linear relaxation as a feasibility check.
    #[default]
    Exact,
    /// A relaxed node mapping LP, rounding of its assignment, then a link mapping LP.
    Rounded { randomized: bool, seed: u64 },
}

/// Mathematical programming mapping options.
#[derive(
    Debug, Clone, Copy, PartialEq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize,
)]
pub struct MathProgOpts {
    #[builder(default)]
    pub mode: MathProgMode,
    #[builder(default)]
    pub path_splitting: bool,
    #[builder(default = 1.0)]
    pub weight_cpu: f64,
    #[builder(default = 1.0)]
    pub weight_bw: f64,
}

impl Default for MathProgOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MathProgOpts {
    fn weights(&self) -> ModelWeights {
        ModelWeights::new(self.weight_cpu, self.weight_bw)
    }
}

/// Mapping through an LP/MILP solver.
#[derive(Debug, Clone)]
pub struct MathProg<S> {
    opts: MathProgOpts,
    solver: S,
}

impl<S: LpSolver> MathProg<S> {
    pub fn new(opts: MathProgOpts, solver: S) -> Self {
        Self { opts, solver }
    }

    pub fn opts(&self) -> &MathProgOpts {
        &self.opts
    }

    fn solve(&self, model: &LpModel, mode: SolveMode) -> Result<SolverOutcome, Abort> {
        let outcome = self.solver.solve(model, mode)?;
        match outcome.status {
            SolverStatus::TimedOut => {
                log::warn!("solver timed out on {}", model.name());
                Err(RejectReason::SolverTimeout.into())
            }
            _ if !outcome.feasible => Err(RejectReason::SolverInfeasible.into()),
            _ => Ok(outcome),
        }
    }

    fn exact(&self, tx: &mut Transaction<'_>, vn: &VirtualNetwork) -> Result<Solved, Abort> {
        let model = LpModel::exact(
            tx.substrate(),
            vn,
            self.opts.weights(),
            self.opts.path_splitting,
        );
        self.solve(&model, SolveMode::Relaxed)?;
        let outcome = self.solve(&model, SolveMode::Integer)?;
        let mut nodes = BTreeMap::new();
        for ((v, s), value) in outcome.x() {
            if value > 0.5 {
                nodes.insert(v, s);
            }
        }
        if let Some(v) = vn.nodes().find(|v| !nodes.contains_key(&v.id)) {
            return Err(RejectReason::InsufficientResource { vnode: v.id }.into());
        }
        reserve_nodes(tx, vn, &nodes)?;
        let links = self.route_links(tx, vn, &nodes, &outcome)?;
        Ok(((nodes, links), outcome.objective))
    }

    fn rounded(
        &self,
        tx: &mut Transaction<'_>,
        vn: &VirtualNetwork,
        randomized: bool,
        seed: u64,
    ) -> Result<Solved, Abort> {
        let model = LpModel::node_mapping(tx.substrate(), vn, self.opts.weights());
        let relaxed = self.solve(&model, SolveMode::Relaxed)?;
        let lambda = relaxed.lambda();
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(vn.id().inner() as u64));
        let mut nodes = BTreeMap::new();
        let mut used = FxHashSet::default();
        for v in vn.nodes() {
            let candidates = lambda
                .range((v.id, NodeId::ZERO)..=(v.id, NodeId::new(usize::MAX)))
                .map(|(&(_, s), &value)| (s, value))
                .filter(|&(s, _)| !used.contains(&s) && can_host(tx.substrate(), s, v))
                .collect::<Vec<_>>();
            let host = match randomized {
                true => draw(&candidates, &mut rng),
                false => largest(&candidates),
            }
            .ok_or(RejectReason::InsufficientResource { vnode: v.id })?;
            tx.reserve_all(Target::Node(host), &v.demands)?;
            used.insert(host);
            nodes.insert(v.id, host);
        }
        let model = LpModel::link_mapping(
            tx.substrate(),
            vn,
            &nodes,
            self.opts.weights(),
            self.opts.path_splitting,
        );
        let mode = match self.opts.path_splitting {
            true => SolveMode::Relaxed,
            false => SolveMode::Integer,
        };
        let outcome = self.solve(&model, mode)?;
        let links = self.route_links(tx, vn, &nodes, &outcome)?;
        Ok(((nodes, links), outcome.objective))
    }

    /// Decodes the flow variables of `outcome` into routes and reserves them.
    fn route_links(
        &self,
        tx: &mut Transaction<'_>,
        vn: &VirtualNetwork,
        nodes: &BTreeMap<VNodeId, NodeId>,
        outcome: &SolverOutcome,
    ) -> Result<BTreeMap<VLinkId, LinkRoute>, Abort> {
        let flow = outcome.flow();
        let mut routes = BTreeMap::new();
        for vl in vn.links() {
            let (Some(&src), Some(&dst)) = (nodes.get(&vl.a), nodes.get(&vl.b)) else {
                return Err(RejectReason::NoFeasiblePath { vlink: vl.id }.into());
            };
            let demand = vl.bandwidth();
            let net = net_flow(tx.substrate(), &flow, vl.id);
            let parts = decompose(net, src, dst, demand)
                .ok_or(RejectReason::NoFeasiblePath { vlink: vl.id })?;
            let route = LinkRoute::from_parts(&parts, demand);
            match &route {
                LinkRoute::Path(path) => reserve_path(tx, path, demand, 0.0)?,
                LinkRoute::Flow(shares) => {
                    for share in shares {
                        let amount = share.fraction * demand;
                        let available = tx
                            .substrate()
                            .link_available(share.link, ResourceKind::Bandwidth);
                        // Solver round-off may overshoot the residual capacity slightly
                        let amount = match amount > available
                            && amount <= available + FLOW_TOLERANCE * demand.max(1.0)
                        {
                            true => available,
                            false => amount,
                        };
                        tx.reserve(Target::Link(share.link), ResourceKind::Bandwidth, amount)?;
                    }
                }
            }
            routes.insert(vl.id, route);
        }
        Ok(routes)
    }
}

type Solved = (Placement, Option<f64>);

impl<S: LpSolver> MappingAlgo for MathProg<S> {
    fn map_network(
        &self,
        substrate: &mut SubstrateNetwork,
        vn: &VirtualNetwork,
    ) -> Result<Outcome, MappingError> {
        // A virtual node no substrate node can host makes every model infeasible
        if let Some(v) = vn
            .nodes()
            .find(|v| !substrate.nodes().any(|s| can_host(substrate, s.id, v)))
        {
            return Ok(Outcome::Rejected(RejectReason::InsufficientResource {
                vnode: v.id,
            }));
        }
        transactional(substrate, vn, |tx| match self.opts.mode {
            MathProgMode::Exact => self.exact(tx, vn),
            MathProgMode::Rounded { randomized, seed } => self.rounded(tx, vn, randomized, seed),
        })
    }
}

fn reserve_nodes(
    tx: &mut Transaction<'_>,
    vn: &VirtualNetwork,
    nodes: &BTreeMap<VNodeId, NodeId>,
) -> Result<(), Abort> {
    for v in vn.nodes() {
        if let Some(&s) = nodes.get(&v.id) {
            tx.reserve_all(Target::Node(s), &v.demands)?;
        }
    }
    Ok(())
}

/// The candidate of largest value, lowest ID on ties.
fn largest(candidates: &[(NodeId, f64)]) -> Option<NodeId> {
    candidates
        .iter()
        .fold(None, |best: Option<(NodeId, f64)>, &(s, value)| match best {
            Some((_, b)) if value <= b + EPSILON => best,
            _ => Some((s, value)),
        })
        .map(|(s, _)| s)
}

/// A candidate drawn with probability proportional to its value. Falls back to [`largest`] when
/// no candidate has a positive value.
fn draw(candidates: &[(NodeId, f64)], rng: &mut StdRng) -> Option<NodeId> {
    let total = candidates.iter().map(|&(_, v)| v.max(0.0)).sum::<f64>();
    if total <= FLOW_TOLERANCE {
        return largest(candidates);
    }
    let mut target = rng.gen_range(0.0..total);
    for &(s, value) in candidates {
        let value = value.max(0.0);
        if target < value {
            return Some(s);
        }
        target -= value;
    }
    largest(candidates)
}

/// Net flow fraction of one virtual link over each substrate link, oriented in its direction of
/// travel. Keyed by tail node, then ordered by link ID.
fn net_flow(
    substrate: &SubstrateNetwork,
    flow: &BTreeMap<(VLinkId, NodeId, NodeId), f64>,
    vlink: VLinkId,
) -> BTreeMap<NodeId, Vec<(LinkId, NodeId, f64)>> {
    let mut out: BTreeMap<NodeId, Vec<(LinkId, NodeId, f64)>> = BTreeMap::new();
    for e in substrate.links() {
        let forward = flow.get(&(vlink, e.a, e.b)).copied().unwrap_or(0.0);
        let backward = flow.get(&(vlink, e.b, e.a)).copied().unwrap_or(0.0);
        let net = forward - backward;
        if net > FLOW_TOLERANCE {
            out.entry(e.a).or_default().push((e.id, e.b, net));
        } else if net < -FLOW_TOLERANCE {
            out.entry(e.b).or_default().push((e.id, e.a, -net));
        }
    }
    out
}

// Flow that may go missing when round-off edges are dropped during decomposition.
const DECOMPOSITION_SLACK: f64 = 1e-4;

/// Splits a unit flow from `src` to `dst` into paths carrying `demand` in total. Returns `None`
/// if the flow does not connect the endpoints.
fn decompose(
    mut net: BTreeMap<NodeId, Vec<(LinkId, NodeId, f64)>>,
    src: NodeId,
    dst: NodeId,
    demand: f64,
) -> Option<Vec<FlowPart>> {
    let mut fractions: Vec<(Path, f64)> = Vec::new();
    let mut carried = 0.0;
    while carried + FLOW_TOLERANCE < 1.0 {
        let Some(path) = find_path(&net, src, dst) else {
            break;
        };
        let bottleneck = path
            .links
            .iter()
            .zip(&path.nodes)
            .filter_map(|(l, tail)| net.get(tail)?.iter().find(|e| e.0 == *l).map(|e| e.2))
            .fold(f64::INFINITY, f64::min)
            .min(1.0 - carried);
        for (l, tail) in path.links.iter().zip(&path.nodes) {
            if let Some(edges) = net.get_mut(tail) {
                for e in edges.iter_mut().filter(|e| e.0 == *l) {
                    e.2 -= bottleneck;
                }
                edges.retain(|e| e.2 > FLOW_TOLERANCE);
            }
        }
        carried += bottleneck;
        fractions.push((path, bottleneck));
    }
    if fractions.is_empty() || carried + DECOMPOSITION_SLACK < 1.0 {
        return None;
    }
    // Amounts add up to the demand exactly; the last part absorbs round-off
    let mut parts = Vec::with_capacity(fractions.len());
    let mut assigned = 0.0;
    let last = fractions.len() - 1;
    for (i, (path, fraction)) in fractions.into_iter().enumerate() {
        let amount = match i == last {
            true => (demand - assigned).max(0.0),
            false => fraction / carried * demand,
        };
        assigned += amount;
        parts.push(FlowPart { path, amount });
    }
    Some(parts)
}

/// A simple path from `src` to `dst` over the remaining flow, depth first in link order.
fn find_path(
    net: &BTreeMap<NodeId, Vec<(LinkId, NodeId, f64)>>,
    src: NodeId,
    dst: NodeId,
) -> Option<Path> {
    let mut nodes = vec![src];
    let mut links = Vec::new();
    let mut visited = FxHashSet::from_iter([src]);
    // Per depth, the index of the next edge to try
    let mut cursor = vec![0];
    while let Some(&tail) = nodes.last() {
        if tail == dst {
            return Some(Path::new(nodes, links));
        }
        let depth = cursor.len() - 1;
        let edges = net.get(&tail).map(Vec::as_slice).unwrap_or(&[]);
        match edges[cursor[depth]..].iter().position(|e| !visited.contains(&e.1)) {
            Some(offset) => {
                let (link, head, _) = edges[cursor[depth] + offset];
                cursor[depth] += offset + 1;
                visited.insert(head);
                nodes.push(head);
                links.push(link);
                cursor.push(0);
            }
            None => {
                nodes.pop();
                links.pop();
                cursor.pop();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::network::VnId;
    use crate::solver::SolverError;
    use crate::testing;

    /// Replays prepared outcomes, one per call, and records the models it was asked to solve.
    #[derive(Debug, Default)]
    struct Scripted {
        outcomes: Mutex<Vec<SolverOutcome>>,
        calls: Mutex<Vec<(String, SolveMode)>>,
    }

    impl Scripted {
        fn new(mut outcomes: Vec<SolverOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<(String, SolveMode)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl LpSolver for Scripted {
        fn solve(&self, model: &LpModel, mode: SolveMode) -> Result<SolverOutcome, SolverError> {
            self.calls
                .lock()
                .unwrap()
                .push((model.name().to_owned(), mode));
            self.outcomes
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| SolverError::Backend("script exhausted".into()))
        }
    }

    fn optimal(values: &[(&str, f64)], objective: f64) -> SolverOutcome {
        SolverOutcome::optimal(
            values.iter().map(|&(n, v)| (n.to_owned(), v)).collect(),
            objective,
        )
    }

    fn exact_solution() -> SolverOutcome {
        optimal(
            &[
                ("x[0,0]", 1.0),
                ("x[0,1]", 0.0),
                ("x[1,0]", 0.0),
                ("x[1,1]", 1.0),
                ("flow[0,0,1]", 1.0),
                ("flow[0,1,0]", 0.0),
            ],
            1.3,
        )
    }

    #[test]
    fn exact_mapping_decodes_the_solution() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let solver = Scripted::new(vec![exact_solution(), exact_solution()]);
        let algo = MathProg::new(MathProgOpts::default(), &solver);
        let outcome = algo.map_network(&mut substrate, &vn)?;
        let embedding = outcome.embedding().unwrap();
        assert_eq!(embedding.nodes[&VNodeId::new(1)], NodeId::new(1));
        let LinkRoute::Path(path) = &embedding.links[&VLinkId::ZERO] else {
            panic!("expected a single path");
        };
        assert_eq!(path.links, vec![LinkId::ZERO]);
        assert_eq!(embedding.objective, Some(1.3));
        assert_eq!(substrate.node_available(NodeId::ZERO, ResourceKind::Cpu), 6.0);
        assert_eq!(substrate.link_available(LinkId::ZERO, ResourceKind::Bandwidth), 5.0);
        let modes = solver.calls().into_iter().map(|c| c.1).collect::<Vec<_>>();
        assert_eq!(modes, vec![SolveMode::Relaxed, SolveMode::Integer]);
        Ok(())
    }

    #[test]
    fn infeasible_relaxation_skips_the_integer_solve() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let before = substrate.residual_state();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 15.0);
        let solver = Scripted::new(vec![SolverOutcome::without_solution(
            SolverStatus::Infeasible,
        )]);
        let algo = MathProg::new(MathProgOpts::default(), &solver);
        let outcome = algo.map_network(&mut substrate, &vn)?;
        assert_eq!(outcome, Outcome::Rejected(RejectReason::SolverInfeasible));
        assert_eq!(solver.calls().len(), 1);
        assert_eq!(substrate.residual_state(), before);
        Ok(())
    }

    #[test]
    fn timeout_is_a_rejection() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let solver = Scripted::new(vec![
            exact_solution(),
            SolverOutcome::without_solution(SolverStatus::TimedOut),
        ]);
        let algo = MathProg::new(MathProgOpts::default(), &solver);
        let outcome = algo.map_network(&mut substrate, &vn)?;
        assert_eq!(outcome, Outcome::Rejected(RejectReason::SolverTimeout));
        Ok(())
    }

    #[test]
    fn solver_errors_propagate() {
        let mut substrate = testing::two_node_substrate();
        let before = substrate.residual_state();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let res = MathProg::new(MathProgOpts::default(), crate::solver::NoSolver)
            .map_network(&mut substrate, &vn);
        assert!(matches!(
            res,
            Err(MappingError::Solver(SolverError::Unavailable(_)))
        ));
        assert_eq!(substrate.residual_state(), before);
    }

    #[test]
    fn hostless_node_is_rejected_before_solving() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let vn = testing::pair_request(VnId::ZERO, 11.0, 5.0);
        let solver = Scripted::default();
        let algo = MathProg::new(MathProgOpts::default(), &solver);
        let outcome = algo.map_network(&mut substrate, &vn)?;
        assert_eq!(
            outcome,
            Outcome::Rejected(RejectReason::InsufficientResource {
                vnode: VNodeId::ZERO
            })
        );
        assert!(solver.calls().is_empty());
        Ok(())
    }

    #[test]
    fn rounding_takes_the_largest_assignment() -> anyhow::Result<()> {
        let mut substrate = testing::line_substrate(3, 10.0, 10.0);
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let relaxed = optimal(
            &[
                ("lambda[0,0]", 0.2),
                ("lambda[0,1]", 0.7),
                ("lambda[0,2]", 0.1),
                ("lambda[1,0]", 0.1),
                ("lambda[1,1]", 0.6),
                ("lambda[1,2]", 0.3),
            ],
            0.8,
        );
        // Virtual node 1 loses node 1 to virtual node 0 and takes node 2
        let links = optimal(&[("flow[0,1,2]", 1.0)], 0.5);
        let solver = Scripted::new(vec![relaxed, links]);
        let opts = MathProgOpts::builder()
            .mode(MathProgMode::Rounded {
                randomized: false,
                seed: 0,
            })
            .build();
        let outcome = MathProg::new(opts, &solver).map_network(&mut substrate, &vn)?;
        let embedding = outcome.embedding().unwrap();
        assert_eq!(embedding.nodes[&VNodeId::new(0)], NodeId::new(1));
        assert_eq!(embedding.nodes[&VNodeId::new(1)], NodeId::new(2));
        assert_eq!(embedding.links[&VLinkId::ZERO].links(), vec![LinkId::new(1)]);
        assert_eq!(embedding.objective, Some(0.5));
        let calls = solver.calls();
        assert_eq!(calls[0].0, "node_mapping vn 0");
        assert_eq!(calls[1], ("link_mapping vn 0".to_owned(), SolveMode::Integer));
        Ok(())
    }

    #[test]
    fn split_flows_become_link_shares() -> anyhow::Result<()> {
        let mut substrate = testing::diamond_substrate();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 16.0);
        let solution = optimal(
            &[
                ("x[0,0]", 1.0),
                ("x[1,3]", 1.0),
                ("flow[0,0,1]", 0.5),
                ("flow[0,1,3]", 0.5),
                ("flow[0,0,2]", 0.5),
                ("flow[0,2,3]", 0.5),
            ],
            4.0,
        );
        let solver = Scripted::new(vec![solution.clone(), solution]);
        let opts = MathProgOpts::builder().path_splitting(true).build();
        let outcome = MathProg::new(opts, &solver).map_network(&mut substrate, &vn)?;
        let embedding = outcome.embedding().unwrap();
        let LinkRoute::Flow(shares) = &embedding.links[&VLinkId::ZERO] else {
            panic!("expected a split flow");
        };
        assert_eq!(shares.len(), 4);
        assert!(shares.iter().all(|s| (s.fraction - 0.5).abs() < 1e-9));
        for l in 0..4 {
            assert_eq!(
                substrate.link_available(LinkId::new(l), ResourceKind::Bandwidth),
                2.0
            );
        }
        Ok(())
    }

    #[test]
    fn decomposition_ignores_cycles() {
        let n = NodeId::new;
        let l = LinkId::new;
        let mut net: BTreeMap<NodeId, Vec<(LinkId, NodeId, f64)>> = BTreeMap::new();
        net.insert(n(0), vec![(l(0), n(1), 1.0)]);
        // A detour 1 -> 2 -> 1 that carries no net flow towards the destination
        net.insert(n(1), vec![(l(1), n(2), 0.5), (l(2), n(3), 1.0)]);
        net.insert(n(2), vec![(l(3), n(1), 0.5)]);
        let parts = decompose(net, n(0), n(3), 10.0).unwrap();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].path.links, vec![l(0), l(2)]);
        assert_eq!(parts[0].amount, 10.0);
    }

    #[test]
    fn rounding_draws_are_reproducible() {
        let candidates = [
            (NodeId::new(0), 0.25),
            (NodeId::new(1), 0.5),
            (NodeId::new(2), 0.25),
        ];
        let picks = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..20)
                .map(|_| draw(&candidates, &mut rng))
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(3), picks(3));
        assert!(picks(3).iter().all(Option::is_some));
        assert_eq!(largest(&candidates), Some(NodeId::new(1)));
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(draw(&[(NodeId::new(4), 0.0)], &mut rng), Some(NodeId::new(4)));
    }
}
