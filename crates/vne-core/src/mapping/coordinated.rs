use std::collections::{BTreeMap, VecDeque};

use ordered_float::OrderedFloat;
use rand::prelude::*;
use rustc_hash::FxHashSet;

use crate::constants::EPSILON;
use crate::cost::{BandwidthCpuCost, Candidate, HiddenHopCost};
use crate::embedding::LinkRoute;
use crate::mapping::{
    can_host, reserve_parts, transactional, Abort, MappingAlgo, MappingError, Outcome,
    RejectReason, Router,
};
use crate::network::{
    NodeId, ResourceKind, SubstrateNetwork, Transaction, VLink, VLinkId, VNode, VNodeId,
    VirtualNetwork,
};
use crate::resource::Target;
use crate::search::{FlowPart, Scope, SearchOpts};

/// Coordinated mapping options.
#[derive(
    Debug, Clone, Copy, PartialEq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize,
)]
pub struct CoordinatedOpts {
    #[builder(default = 1.0)]
    pub weight_cpu: f64,
    #[builder(default = 1.0)]
    pub weight_bw: f64,
    #[builder(default)]
    pub hidden_hop_factor: f64,
    #[builder(default)]
    pub max_distance: Option<usize>,
    /// Paths enumerated per virtual link.
    #[builder(default = 1)]
    pub k: usize,
    #[builder(default)]
    pub path_splitting: bool,
    /// Draw uniformly among equally scored candidates instead of taking the lowest node ID.
    #[builder(default)]
    pub randomize: bool,
    #[builder(default)]
    pub seed: u64,
    /// Maximum number of substrate candidates scored per virtual node. `None` scores them all.
    #[builder(default)]
    pub candidate_budget: Option<usize>,
}

impl Default for CoordinatedOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Coordinated node and link mapping. Virtual nodes are visited breadth-first from the most
/// demanding one; every candidate host is scored by its own cost plus the cost of routing the
/// virtual links back to the neighbors already placed, and the links are routed right away.
///
/// Candidates are ranked by `(score, NodeId)`. In deterministic mode the first feasible one wins.
/// In randomized mode the first pick is drawn uniformly among the candidates within `EPSILON` of
/// the best score, from an RNG seeded with `seed` plus the virtual network ID.
#[derive(Debug, Clone, derive_new::new)]
pub struct Coordinated {
    opts: CoordinatedOpts,
}

impl Coordinated {
    fn cost(&self) -> BandwidthCpuCost {
        BandwidthCpuCost::new(
            self.opts.weight_cpu,
            self.opts.weight_bw,
            self.opts.hidden_hop_factor,
        )
    }

    fn search(&self) -> SearchOpts {
        SearchOpts::builder()
            .k(self.opts.k)
            .max_distance(self.opts.max_distance)
            .hidden_hop_factor(self.opts.hidden_hop_factor)
            .build()
    }

    /// Virtual nodes in breadth-first order from the node with the largest CPU demand (lowest ID
    /// on ties). Neighbors are visited in link ID order.
    fn visit_order(vn: &VirtualNetwork) -> Vec<VNodeId> {
        let Some(root) = vn
            .nodes()
            .max_by_key(|v| (OrderedFloat(v.demand(ResourceKind::Cpu)), std::cmp::Reverse(v.id)))
            .map(|v| v.id)
        else {
            return Vec::new();
        };
        let mut order = vec![root];
        let mut seen = FxHashSet::from_iter([root]);
        let mut queue = VecDeque::from([root]);
        while let Some(v) = queue.pop_front() {
            for (_, w) in vn.neighbors(v) {
                if seen.insert(w) {
                    order.push(w);
                    queue.push_back(w);
                }
            }
        }
        order
    }

    /// Ranks `candidates` by `(score, id)` and, in randomized mode, moves a random one of the
    /// best-scored group to the front.
    fn rank(&self, mut scored: Vec<(f64, NodeId)>, rng: &mut StdRng) -> Vec<NodeId> {
        scored.sort_by_key(|&(score, id)| (OrderedFloat(score), id));
        if self.opts.randomize {
            if let Some(&(best, _)) = scored.first() {
                let ties = scored
                    .iter()
                    .take_while(|(score, _)| *score - best <= EPSILON || *score == best)
                    .count();
                let pick = rng.gen_range(0..ties);
                let chosen = scored.remove(pick);
                scored.insert(0, chosen);
            }
        }
        scored.into_iter().map(|(_, id)| id).collect()
    }

    fn attempt(
        &self,
        tx: &mut Transaction<'_>,
        vn: &VirtualNetwork,
        router: &Router<'_>,
        cost: &BandwidthCpuCost,
    ) -> Result<(BTreeMap<VNodeId, NodeId>, BTreeMap<VLinkId, LinkRoute>), Abort> {
        let mut rng = StdRng::seed_from_u64(self.opts.seed.wrapping_add(vn.id().inner() as u64));
        let mut nodes: BTreeMap<VNodeId, NodeId> = BTreeMap::new();
        let mut links = BTreeMap::new();
        for v in Self::visit_order(vn) {
            let Some(vnode) = vn.node(v) else { continue };
            // Virtual links back to already placed neighbors, in link ID order
            let back_links = vn
                .neighbors(v)
                .into_iter()
                .filter_map(|(vl, w)| nodes.get(&w).map(|&host| (vl, host)))
                .collect::<Vec<_>>();
            let used = nodes.values().copied().collect::<FxHashSet<_>>();
            let substrate = tx.substrate();
            let mut hosts = substrate
                .nodes()
                .filter(|s| !used.contains(&s.id) && can_host(substrate, s.id, vnode))
                .map(|s| (cost.cost(&Candidate::node(substrate, s.id)), s.id))
                .collect::<Vec<_>>();
            if hosts.is_empty() {
                return Err(RejectReason::InsufficientResource { vnode: v }.into());
            }
            hosts.sort_by_key(|&(c, id)| (OrderedFloat(c), id));
            let truncated = match self.opts.candidate_budget {
                Some(budget) if hosts.len() > budget => {
                    hosts.truncate(budget);
                    true
                }
                _ => false,
            };
            // Joint score: node cost plus the cost of every back link routed independently
            let scored = hosts
                .into_iter()
                .filter_map(|(node_cost, s)| {
                    let mut total = node_cost;
                    for &(vl, host) in &back_links {
                        let parts = router.route(substrate, host, s, vl.bandwidth())?;
                        total += route_cost(substrate, cost, &parts, vl.bandwidth());
                    }
                    Some((total, s))
                })
                .collect::<Vec<_>>();
            let ranked = self.rank(scored, &mut rng);
            let mut placed = None;
            let mut failed_link = None;
            for s in ranked {
                let mark = tx.savepoint();
                match self.place(tx, router, vnode, s, &back_links)? {
                    Ok(routes) => {
                        placed = Some((s, routes));
                        break;
                    }
                    Err(vl) => {
                        if failed_link.is_none() {
                            failed_link = vl;
                        }
                        tx.rollback_to(mark)?;
                    }
                }
            }
            let Some((s, routes)) = placed else {
                let reason = match (truncated, failed_link, back_links.first()) {
                    (true, _, _) => RejectReason::BudgetExhausted,
                    (_, Some(vlink), _) => RejectReason::NoFeasiblePath { vlink },
                    (_, None, Some((vl, _))) => RejectReason::NoFeasiblePath { vlink: vl.id },
                    (_, None, None) => RejectReason::InsufficientResource { vnode: v },
                };
                return Err(reason.into());
            };
            log::trace!("virtual node {} placed on {} with {} link(s)", v, s, routes.len());
            nodes.insert(v, s);
            links.extend(routes);
        }
        Ok((nodes, links))
    }

    /// Reserves `vnode` on `s` and routes its back links. The inner `Err` names the first virtual
    /// link that could not be routed, or nothing if the node itself could not be reserved.
    #[allow(clippy::type_complexity)]
    fn place(
        &self,
        tx: &mut Transaction<'_>,
        router: &Router<'_>,
        vnode: &VNode,
        s: NodeId,
        back_links: &[(&VLink, NodeId)],
    ) -> Result<Result<Vec<(VLinkId, LinkRoute)>, Option<VLinkId>>, Abort> {
        match tx.reserve_all(Target::Node(s), &vnode.demands) {
            Ok(()) => {}
            Err(e) if e.is_shortage() => return Ok(Err(None)),
            Err(e) => return Err(Abort::Fail(e.into())),
        }
        let mut routes = Vec::new();
        for &(vl, host) in back_links {
            let bandwidth = vl.bandwidth();
            let Some(parts) = router.route(tx.substrate(), host, s, bandwidth) else {
                return Ok(Err(Some(vl.id)));
            };
            match reserve_parts(tx, &parts, self.opts.hidden_hop_factor) {
                Ok(()) => {}
                Err(e) if e.is_shortage() => return Ok(Err(Some(vl.id))),
                Err(e) => return Err(Abort::Fail(e.into())),
            }
            routes.push((vl.id, LinkRoute::from_parts(&parts, bandwidth)));
        }
        Ok(Ok(routes))
    }
}

/// Cost of a route, each part weighted by its share of the demand.
fn route_cost(
    substrate: &SubstrateNetwork,
    cost: &BandwidthCpuCost,
    parts: &[FlowPart],
    demand: f64,
) -> f64 {
    parts
        .iter()
        .map(|p| {
            let share = if demand > EPSILON { p.amount / demand } else { 1.0 };
            share * cost.cost(&Candidate::path(substrate, &p.path))
        })
        .sum()
}

impl MappingAlgo for Coordinated {
    fn map_network(
        &self,
        substrate: &mut SubstrateNetwork,
        vn: &VirtualNetwork,
    ) -> Result<Outcome, MappingError> {
        let cost = self.cost();
        let scope = Scope::All;
        let router = Router {
            search: self.search(),
            path_splitting: self.opts.path_splitting,
            cost: &cost,
            scope: &scope,
        };
        transactional(substrate, vn, |tx| {
            let placement = self.attempt(tx, vn, &router, &cost)?;
            Ok((placement, None))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{LinkId, VnId};
    use crate::resource::ResourceError;
    use crate::testing;

    #[test]
    fn two_node_request_is_mapped() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let outcome = Coordinated::new(CoordinatedOpts::default()).map_network(&mut substrate, &vn)?;
        assert!(outcome.is_mapped());
        assert_eq!(substrate.node_available(NodeId::new(0), ResourceKind::Cpu), 6.0);
        assert_eq!(substrate.node_available(NodeId::new(1), ResourceKind::Cpu), 6.0);
        assert_eq!(substrate.link_available(LinkId::ZERO, ResourceKind::Bandwidth), 5.0);
        Ok(())
    }

    #[test]
    fn placement_follows_the_links() -> anyhow::Result<()> {
        // A line 0-1-2-3 where node 0 has the most CPU; the second virtual node must land next
        // to the first rather than on the cheapest far node
        let mut substrate = testing::line_substrate_with(&[20.0, 5.0, 5.0, 20.0], 10.0);
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let outcome = Coordinated::new(CoordinatedOpts::default()).map_network(&mut substrate, &vn)?;
        let embedding = outcome.embedding().unwrap();
        let a = embedding.nodes[&VNodeId::new(0)];
        let b = embedding.nodes[&VNodeId::new(1)];
        let hops = embedding.links[&VLinkId::ZERO].links().len();
        assert_eq!(hops, 1, "{a} and {b} should be adjacent");
        Ok(())
    }

    #[test]
    fn rejection_leaves_no_trace() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let before = substrate.residual_state();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 15.0);
        let outcome = Coordinated::new(CoordinatedOpts::default()).map_network(&mut substrate, &vn)?;
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectReason::NoFeasiblePath { .. })
        ));
        assert_eq!(substrate.residual_state(), before);
        Ok(())
    }

    #[test]
    fn deterministic_without_randomization() -> anyhow::Result<()> {
        let vn = testing::chain_request(VnId::ZERO, 4, 2.0, 3.0);
        let algo = Coordinated::new(CoordinatedOpts::builder().k(2).build());
        let a = algo.map_network(&mut testing::grid_substrate(3, 3, 10.0, 10.0), &vn)?;
        let b = algo.map_network(&mut testing::grid_substrate(3, 3, 10.0, 10.0), &vn)?;
        assert!(a.is_mapped());
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn randomized_ties_are_reproducible() -> anyhow::Result<()> {
        // A single virtual node on a uniform grid: every host ties
        let vn = VirtualNetwork::new(
            VnId::ZERO,
            vec![VNode::with_cpu(VNodeId::ZERO, 1.0)],
            Vec::<VLink>::new(),
        )?;
        let opts = CoordinatedOpts::builder().randomize(true).seed(7).build();
        let algo = Coordinated::new(opts);
        let host = |outcome: Outcome| outcome.embedding().map(|e| e.nodes[&VNodeId::ZERO]);
        let a = host(algo.map_network(&mut testing::line_substrate(5, 10.0, 10.0), &vn)?);
        let b = host(algo.map_network(&mut testing::line_substrate(5, 10.0, 10.0), &vn)?);
        assert!(a.is_some());
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn broken_invariants_are_not_rejections() {
        let mut substrate = testing::two_node_substrate();
        let algo = Coordinated::new(CoordinatedOpts::default());
        let cost = algo.cost();
        let scope = Scope::All;
        let router = Router {
            search: algo.search(),
            path_splitting: false,
            cost: &cost,
            scope: &scope,
        };
        let vnode = VNode::with_cpu(VNodeId::ZERO, 1.0);
        let mut tx = substrate.transaction();
        // Node 42 is not part of the substrate
        let res = algo.place(&mut tx, &router, &vnode, NodeId::new(42), &[]);
        assert!(matches!(
            res,
            Err(Abort::Fail(MappingError::Resource(
                ResourceError::UnknownTarget(..)
            )))
        ));
        let hungry = VNode::with_cpu(VNodeId::ZERO, 50.0);
        let res = algo.place(&mut tx, &router, &hungry, NodeId::ZERO, &[]);
        assert!(matches!(res, Ok(Err(None))));
    }

    #[test]
    fn budget_exhaustion_is_reported() -> anyhow::Result<()> {
        // No substrate link can carry the virtual link, and a budget of one candidate gives up
        // after scoring a single host for the second node
        let mut substrate = testing::line_substrate_with(&[10.0, 4.0, 4.0], 10.0);
        let vn = testing::chain_request(VnId::ZERO, 2, 4.0, 20.0);
        let opts = CoordinatedOpts::builder().candidate_budget(Some(1)).build();
        let outcome = Coordinated::new(opts).map_network(&mut substrate, &vn)?;
        assert_eq!(outcome, Outcome::Rejected(RejectReason::BudgetExhausted));
        let outcome = Coordinated::new(CoordinatedOpts::default()).map_network(&mut substrate, &vn)?;
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectReason::NoFeasiblePath { .. })
        ));
        Ok(())
    }
}
