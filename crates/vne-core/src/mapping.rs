//! Mapping algorithms. Every algorithm implements [`MappingAlgo`]: it either commits a complete
//! embedding of a virtual network or leaves the substrate exactly as it found it.

mod coordinated;
mod distributed;
mod greedy;
mod mathprog;
pub mod partition;

use std::collections::BTreeMap;
use std::fmt;

pub use coordinated::{Coordinated, CoordinatedOpts};
pub use distributed::{Distributed, DistributedOpts};
pub use greedy::{Greedy, GreedyOpts};
pub use mathprog::{MathProg, MathProgMode, MathProgOpts};

use crate::cost::HiddenHopCost;
use crate::embedding::{Embedding, LinkRoute};
use crate::network::{
    NetworkStack, NodeId, ResourceKind, SubstrateNetwork, Transaction, VLinkId, VNode, VNodeId,
    VirtualNetwork,
};
use crate::resource::{ResourceError, Target};
use crate::search::{self, FlowPart, Path, Scope, SearchOpts};
use crate::solver::SolverError;

/// The trait that must be implemented by all mapping algorithms.
pub trait MappingAlgo: fmt::Debug + Send + Sync {
    /// Tries to embed `vn` on `substrate`. On `Outcome::Mapped` the embedding's reservations are
    /// on the substrate; on `Outcome::Rejected` and on `Err` the substrate is unchanged.
    fn map_network(
        &self,
        substrate: &mut SubstrateNetwork,
        vn: &VirtualNetwork,
    ) -> Result<Outcome, MappingError>;
}

impl<T: MappingAlgo + ?Sized> MappingAlgo for &T {
    fn map_network(
        &self,
        substrate: &mut SubstrateNetwork,
        vn: &VirtualNetwork,
    ) -> Result<Outcome, MappingError> {
        (**self).map_network(substrate, vn)
    }
}

impl<T: MappingAlgo + ?Sized> MappingAlgo for Box<T> {
    fn map_network(
        &self,
        substrate: &mut SubstrateNetwork,
        vn: &VirtualNetwork,
    ) -> Result<Outcome, MappingError> {
        (**self).map_network(substrate, vn)
    }
}

/// The result of one embedding attempt.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Mapped(Embedding),
    Rejected(RejectReason),
}

impl Outcome {
    pub fn is_mapped(&self) -> bool {
        matches!(self, Outcome::Mapped(_))
    }

    pub fn embedding(&self) -> Option<&Embedding> {
        match self {
            Outcome::Mapped(e) => Some(e),
            Outcome::Rejected(_) => None,
        }
    }
}

/// Why a virtual network was not embedded. These are expected, local failures.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// No substrate node can host this virtual node.
    #[display(fmt = "insufficient resources for virtual node {}", vnode)]
    InsufficientResource { vnode: VNodeId },
    /// No path within the search bounds can carry this virtual link.
    #[display(fmt = "no feasible path for virtual link {}", vlink)]
    NoFeasiblePath { vlink: VLinkId },
    /// A reservation failed after the candidate was chosen.
    #[display(fmt = "capacity exceeded while reserving")]
    CapacityExceeded,
    /// The solver proved the model infeasible.
    #[display(fmt = "solver reported infeasibility")]
    SolverInfeasible,
    /// The solver did not finish in time.
    #[display(fmt = "solver timed out")]
    SolverTimeout,
    /// The candidate budget ran out before a joint assignment was found.
    #[display(fmt = "search budget exhausted")]
    BudgetExhausted,
    /// The partitioned mapping has no region to try.
    #[display(fmt = "no region available")]
    NoRegion,
    /// The virtual network was mapped and has since been freed.
    #[display(fmt = "departed")]
    Departed,
    /// The attempt stopped on a mapping error, which failed the run.
    #[display(fmt = "aborted by a mapping error")]
    Aborted,
}

/// Mapping failures that are not rejections: broken invariants and solver failures.
#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Runs `algo` on every pending request of `stack`, in order. On `Err` the request that hit the
/// error is recorded as `RejectReason::Aborted` and the later ones stay pending.
pub fn run(stack: &mut NetworkStack, algo: &dyn MappingAlgo) -> Result<(), MappingError> {
    while let Some(vn) = stack.next_virtual_network() {
        let outcome = match algo.map_network(stack.substrate_mut(), &vn) {
            Ok(outcome) => outcome,
            Err(e) => {
                log::debug!("virtual network {} aborted: {e}", vn.id());
                stack.reject(vn, RejectReason::Aborted);
                return Err(e);
            }
        };
        match &outcome {
            Outcome::Mapped(e) => {
                log::debug!("virtual network {} mapped (cost {:.3})", vn.id(), e.cost())
            }
            Outcome::Rejected(reason) => {
                log::debug!("virtual network {} rejected: {reason}", vn.id())
            }
        }
        stack.record(vn, outcome);
    }
    Ok(())
}

/// Why an attempt stopped early.
#[derive(Debug)]
pub(crate) enum Abort {
    Reject(RejectReason),
    Fail(MappingError),
}

impl From<RejectReason> for Abort {
    fn from(reason: RejectReason) -> Self {
        Abort::Reject(reason)
    }
}

impl From<ResourceError> for Abort {
    fn from(e: ResourceError) -> Self {
        if e.is_shortage() {
            Abort::Reject(RejectReason::CapacityExceeded)
        } else {
            Abort::Fail(e.into())
        }
    }
}

impl From<SolverError> for Abort {
    fn from(e: SolverError) -> Self {
        Abort::Fail(e.into())
    }
}

/// Node assignment and link routes of a finished attempt.
pub(crate) type Placement = (BTreeMap<VNodeId, NodeId>, BTreeMap<VLinkId, LinkRoute>);

/// Runs `attempt` inside a transaction and turns its result into an outcome. A rejected or failed
/// attempt leaves no reservation behind.
pub(crate) fn transactional<F>(
    substrate: &mut SubstrateNetwork,
    vn: &VirtualNetwork,
    attempt: F,
) -> Result<Outcome, MappingError>
where
    F: FnOnce(&mut Transaction<'_>) -> Result<(Placement, Option<f64>), Abort>,
{
    let mut tx = substrate.transaction();
    match attempt(&mut tx) {
        Ok(((nodes, links), objective)) => {
            let embedding =
                Embedding::new(vn.id(), nodes, links, tx.commit()).with_objective(objective);
            Ok(Outcome::Mapped(embedding))
        }
        Err(Abort::Reject(reason)) => {
            tx.rollback()?;
            Ok(Outcome::Rejected(reason))
        }
        Err(Abort::Fail(e)) => Err(e),
    }
}

/// Returns true if `node` can supply every demand of `vnode`.
pub(crate) fn can_host(substrate: &SubstrateNetwork, node: NodeId, vnode: &VNode) -> bool {
    substrate
        .node(node)
        .is_some_and(|n| n.resources.can_supply(&vnode.demands))
}

/// Reserves `parts` of a virtual link's bandwidth, including the CPU of hidden hops.
pub(crate) fn reserve_parts(
    tx: &mut Transaction<'_>,
    parts: &[FlowPart],
    hidden_hop_factor: f64,
) -> Result<(), ResourceError> {
    for part in parts {
        reserve_path(tx, &part.path, part.amount, hidden_hop_factor)?;
    }
    Ok(())
}

pub(crate) fn reserve_path(
    tx: &mut Transaction<'_>,
    path: &Path,
    bandwidth: f64,
    hidden_hop_factor: f64,
) -> Result<(), ResourceError> {
    for &l in &path.links {
        tx.reserve(Target::Link(l), ResourceKind::Bandwidth, bandwidth)?;
    }
    if hidden_hop_factor > 0.0 {
        for &n in path.hidden_hops() {
            tx.reserve(Target::Node(n), ResourceKind::Cpu, hidden_hop_factor * bandwidth)?;
        }
    }
    Ok(())
}

/// Finds routes for virtual links with the configured search.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Router<'a> {
    pub(crate) search: SearchOpts,
    pub(crate) path_splitting: bool,
    pub(crate) cost: &'a dyn HiddenHopCost,
    pub(crate) scope: &'a Scope,
}

impl Router<'_> {
    /// A route for `bandwidth` from `src` to `dst`, or `None` if the search comes back empty.
    pub(crate) fn route(
        &self,
        substrate: &SubstrateNetwork,
        src: NodeId,
        dst: NodeId,
        bandwidth: f64,
    ) -> Option<Vec<FlowPart>> {
        if self.path_splitting {
            let parts = search::split_flow(
                substrate, src, dst, bandwidth, &self.search, self.cost, self.scope,
            );
            return (!parts.is_empty()).then_some(parts);
        }
        search::k_shortest_paths(
            substrate, src, dst, bandwidth, &self.search, self.cost, self.scope,
        )
        .into_iter()
        .next()
        .map(|path| {
            vec![FlowPart {
                path,
                amount: bandwidth,
            }]
        })
    }

    /// Routes and reserves every virtual link of `vn` between its already placed endpoints, in
    /// link ID order.
    pub(crate) fn map_links(
        &self,
        tx: &mut Transaction<'_>,
        vn: &VirtualNetwork,
        nodes: &BTreeMap<VNodeId, NodeId>,
    ) -> Result<BTreeMap<VLinkId, LinkRoute>, Abort> {
        let mut routes = BTreeMap::new();
        for vl in vn.links() {
            let (Some(&src), Some(&dst)) = (nodes.get(&vl.a), nodes.get(&vl.b)) else {
                return Err(RejectReason::NoFeasiblePath { vlink: vl.id }.into());
            };
            let bandwidth = vl.bandwidth();
            let parts = self
                .route(tx.substrate(), src, dst, bandwidth)
                .ok_or(RejectReason::NoFeasiblePath { vlink: vl.id })?;
            reserve_parts(tx, &parts, self.search.hidden_hop_factor)?;
            log::trace!("virtual link {} routed over {} part(s)", vl.id, parts.len());
            routes.insert(vl.id, LinkRoute::from_parts(&parts, bandwidth));
        }
        Ok(routes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{LinkId, VnId};
    use crate::testing;

    #[test]
    fn run_processes_every_request() -> anyhow::Result<()> {
        let requests = vec![
            testing::pair_request(VnId::new(0), 4.0, 5.0),
            testing::pair_request(VnId::new(1), 4.0, 5.0),
            testing::pair_request(VnId::new(2), 4.0, 5.0),
        ];
        let mut stack = NetworkStack::new(testing::two_node_substrate(), requests);
        let algo = Greedy::new(GreedyOpts::default());
        run(&mut stack, &algo)?;
        let mapped = stack
            .processed()
            .iter()
            .map(|p| p.outcome.is_mapped())
            .collect::<Vec<_>>();
        // The third request finds 2 CPU and no bandwidth left
        assert_eq!(mapped, vec![true, true, false]);
        assert_eq!(
            stack.substrate().link_available(LinkId::ZERO, ResourceKind::Bandwidth),
            0.0
        );
        Ok(())
    }

    #[test]
    fn errors_keep_every_request_accounted_for() {
        let requests = vec![
            testing::pair_request(VnId::new(0), 4.0, 5.0),
            testing::pair_request(VnId::new(1), 4.0, 5.0),
        ];
        let mut stack = NetworkStack::new(testing::two_node_substrate(), requests);
        let before = stack.substrate().residual_state();
        let algo = MathProg::new(MathProgOpts::default(), crate::solver::NoSolver);
        assert!(matches!(
            run(&mut stack, &algo),
            Err(MappingError::Solver(..))
        ));
        let processed = stack
            .processed()
            .iter()
            .map(|p| (p.network.id().inner(), p.outcome.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            processed,
            vec![(0, Outcome::Rejected(RejectReason::Aborted))]
        );
        let pending = stack.pending().map(|vn| vn.id().inner()).collect::<Vec<_>>();
        assert_eq!(pending, vec![1]);
        assert_eq!(stack.substrate().residual_state(), before);
    }

    #[test]
    fn rejected_attempt_rolls_back() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let before = substrate.residual_state();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let outcome = transactional(&mut substrate, &vn, |tx| {
            tx.reserve(Target::Node(NodeId::ZERO), ResourceKind::Cpu, 4.0)?;
            Err(RejectReason::NoFeasiblePath {
                vlink: VLinkId::ZERO,
            }
            .into())
        })?;
        assert!(!outcome.is_mapped());
        assert_eq!(substrate.residual_state(), before);
        Ok(())
    }
}
