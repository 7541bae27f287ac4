use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;

use crate::cost::{Candidate, CostKind, HiddenHopCost};
use crate::mapping::{
    can_host, transactional, Abort, MappingAlgo, MappingError, Outcome, RejectReason, Router,
};
use crate::network::{NodeId, SubstrateNetwork, VNodeId, VirtualNetwork};
use crate::resource::Target;
use crate::search::{Scope, SearchOpts};

/// Greedy mapping options.
#[derive(
    Debug, Clone, Copy, PartialEq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize,
)]
pub struct GreedyOpts {
    /// Paths enumerated per virtual link.
    #[builder(default = 1)]
    pub k: usize,
    /// Hop bound of link routes.
    #[builder(default)]
    pub max_distance: Option<usize>,
    /// Split link demands across several paths.
    #[builder(default)]
    pub path_splitting: bool,
    /// Cost model ranking substrate nodes and paths.
    #[builder(default)]
    pub cost: CostKind,
}

impl Default for GreedyOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl GreedyOpts {
    pub(crate) fn search(&self) -> SearchOpts {
        SearchOpts::builder()
            .k(self.k)
            .max_distance(self.max_distance)
            .hidden_hop_factor(self.cost.hidden_hop_factor())
            .build()
    }
}

/// Two-phase greedy mapping. Virtual nodes are placed in ID order, each on the feasible substrate
/// node of least cost (lowest ID on ties), distinct virtual nodes on distinct substrate nodes.
/// Virtual links are then routed between the fixed endpoints.
#[derive(Debug, Clone)]
pub struct Greedy {
    opts: GreedyOpts,
    scope: Scope,
}

impl Greedy {
    pub fn new(opts: GreedyOpts) -> Self {
        Self {
            opts,
            scope: Scope::All,
        }
    }

    /// Restricts the mapping to the nodes of `scope`.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn opts(&self) -> &GreedyOpts {
        &self.opts
    }

    fn map_nodes(
        &self,
        tx: &mut crate::network::Transaction<'_>,
        vn: &VirtualNetwork,
    ) -> Result<BTreeMap<VNodeId, NodeId>, Abort> {
        let mut nodes = BTreeMap::new();
        let mut used = FxHashSet::default();
        for v in vn.nodes() {
            let substrate = tx.substrate();
            let best = substrate
                .nodes()
                .filter(|s| self.scope.contains(s.id) && !used.contains(&s.id))
                .filter(|s| can_host(substrate, s.id, v))
                .min_by_key(|s| {
                    let cost = self.opts.cost.cost(&Candidate::node(substrate, s.id));
                    (OrderedFloat(cost), s.id)
                })
                .map(|s| s.id)
                .ok_or(RejectReason::InsufficientResource { vnode: v.id })?;
            tx.reserve_all(Target::Node(best), &v.demands)?;
            log::trace!("virtual node {} placed on {}", v.id, best);
            used.insert(best);
            nodes.insert(v.id, best);
        }
        Ok(nodes)
    }
}

impl MappingAlgo for Greedy {
    fn map_network(
        &self,
        substrate: &mut SubstrateNetwork,
        vn: &VirtualNetwork,
    ) -> Result<Outcome, MappingError> {
        let router = Router {
            search: self.opts.search(),
            path_splitting: self.opts.path_splitting,
            cost: &self.opts.cost,
            scope: &self.scope,
        };
        transactional(substrate, vn, |tx| {
            let nodes = self.map_nodes(tx, vn)?;
            let links = router.map_links(tx, vn, &nodes)?;
            Ok(((nodes, links), None))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LinkRoute;
    use crate::network::{LinkId, ResourceKind, VnId};
    use crate::testing;

    #[test]
    fn two_node_request_is_mapped() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let outcome = Greedy::new(GreedyOpts::default()).map_network(&mut substrate, &vn)?;
        let embedding = outcome.embedding().unwrap();
        assert_eq!(embedding.nodes[&VNodeId::new(0)], NodeId::new(0));
        assert_eq!(embedding.nodes[&VNodeId::new(1)], NodeId::new(1));
        let LinkRoute::Path(path) = &embedding.links[&crate::network::VLinkId::ZERO] else {
            panic!("expected a single path");
        };
        assert_eq!(path.links, vec![LinkId::ZERO]);
        assert_eq!(substrate.node_available(NodeId::new(0), ResourceKind::Cpu), 6.0);
        assert_eq!(substrate.node_available(NodeId::new(1), ResourceKind::Cpu), 6.0);
        assert_eq!(substrate.link_available(LinkId::ZERO, ResourceKind::Bandwidth), 5.0);
        assert_eq!(embedding.cost(), 13.0);
        Ok(())
    }

    #[test]
    fn oversized_link_is_rejected_without_trace() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let before = substrate.residual_state();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 15.0);
        let outcome = Greedy::new(GreedyOpts::default()).map_network(&mut substrate, &vn)?;
        assert_eq!(
            outcome,
            Outcome::Rejected(RejectReason::NoFeasiblePath {
                vlink: crate::network::VLinkId::ZERO
            })
        );
        assert_eq!(substrate.residual_state(), before);
        Ok(())
    }

    #[test]
    fn distance_bound_rejects_and_releases_nodes() -> anyhow::Result<()> {
        // Only the two ends of the line can host, three hops apart
        let mut substrate = testing::line_substrate_with(&[10.0, 0.0, 0.0, 10.0], 10.0);
        let before = substrate.residual_state();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let opts = GreedyOpts::builder().max_distance(Some(1)).build();
        let outcome = Greedy::new(opts).map_network(&mut substrate, &vn)?;
        assert!(matches!(
            outcome,
            Outcome::Rejected(RejectReason::NoFeasiblePath { .. })
        ));
        assert_eq!(substrate.residual_state(), before);

        let opts = GreedyOpts::builder().max_distance(Some(3)).build();
        let outcome = Greedy::new(opts).map_network(&mut substrate, &vn)?;
        assert!(outcome.is_mapped());
        Ok(())
    }

    #[test]
    fn missing_host_is_rejected() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let vn = testing::pair_request(VnId::ZERO, 11.0, 1.0);
        let outcome = Greedy::new(GreedyOpts::default()).map_network(&mut substrate, &vn)?;
        assert_eq!(
            outcome,
            Outcome::Rejected(RejectReason::InsufficientResource {
                vnode: VNodeId::ZERO
            })
        );
        Ok(())
    }

    #[test]
    fn greedy_is_deterministic() -> anyhow::Result<()> {
        let vn = testing::chain_request(VnId::ZERO, 4, 2.0, 3.0);
        let algo = Greedy::new(GreedyOpts::builder().k(3).build());
        let mut first = testing::grid_substrate(3, 3, 10.0, 10.0);
        let mut second = testing::grid_substrate(3, 3, 10.0, 10.0);
        let a = algo.map_network(&mut first, &vn)?;
        let b = algo.map_network(&mut second, &vn)?;
        assert!(a.is_mapped());
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn split_links_use_several_paths() -> anyhow::Result<()> {
        // Exhaust the CPU of nodes 1 and 2, so the virtual nodes land on 0 and 3
        let mut substrate = testing::diamond_substrate();
        {
            let mut tx = substrate.transaction();
            tx.reserve(Target::Node(NodeId::new(1)), ResourceKind::Cpu, 10.0)?;
            tx.reserve(Target::Node(NodeId::new(2)), ResourceKind::Cpu, 10.0)?;
            tx.commit();
        }
        let vn = testing::pair_request(VnId::ZERO, 4.0, 15.0);
        let unsplit = Greedy::new(GreedyOpts::builder().k(2).build());
        assert!(!unsplit.map_network(&mut substrate, &vn)?.is_mapped());
        let split = Greedy::new(GreedyOpts::builder().k(2).path_splitting(true).build());
        let outcome = split.map_network(&mut substrate, &vn)?;
        let embedding = outcome.embedding().unwrap();
        assert!(matches!(
            embedding.links[&crate::network::VLinkId::ZERO],
            LinkRoute::Flow(_)
        ));
        let left = substrate
            .links()
            .map(|l| l.resources.available(ResourceKind::Bandwidth))
            .sum::<f64>();
        // 15 units over two-hop paths
        assert!((left - (40.0 - 30.0)).abs() < 1e-9);
        Ok(())
    }
}
