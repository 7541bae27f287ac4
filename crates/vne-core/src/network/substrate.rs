use std::collections::BTreeMap;

use crate::constants::EPSILON;
use crate::network::topology::{Topology, TopologyError};
use crate::network::types::{
    Link, LinkId, Node, NodeId, ResourceKind, SubstrateLink, SubstrateNode,
};
use crate::resource::{Demand, Reservation, ResourceError, Resources, Target};

/// The physical network. Its resource state is the single source of truth for admission
/// decisions within a trial.
#[derive(Debug, Clone)]
pub struct SubstrateNetwork {
    topology: Topology<SubstrateNode, SubstrateLink>,
}

impl SubstrateNetwork {
    /// Builds a substrate from declared nodes and links. See `Topology::new` for the structural
    /// checks; capacities must be finite and non-negative.
    pub fn new(nodes: &[Node], links: &[Link]) -> Result<Self, TopologyError> {
        let nodes = nodes
            .iter()
            .map(|n| {
                let resources = Resources::from_capacities(&n.capacities)
                    .map_err(|e| TopologyError::invalid_resources(format!("node {}", n.id), e))?;
                Ok(SubstrateNode {
                    id: n.id,
                    resources,
                })
            })
            .collect::<Result<Vec<_>, TopologyError>>()?;
        let links = links
            .iter()
            .map(|l| {
                let resources = Resources::from_capacities(&l.capacities)
                    .map_err(|e| TopologyError::invalid_resources(format!("link {}", l.id), e))?;
                Ok(SubstrateLink {
                    id: l.id,
                    a: l.a,
                    b: l.b,
                    resources,
                })
            })
            .collect::<Result<Vec<_>, TopologyError>>()?;
        let topology = Topology::new(nodes, links)?;
        Ok(Self { topology })
    }

    pub fn node(&self, id: NodeId) -> Option<&SubstrateNode> {
        self.topology.node(id)
    }

    pub fn link(&self, id: LinkId) -> Option<&SubstrateLink> {
        self.topology.link(id)
    }

    /// The links incident to `id` paired with their opposite endpoints, ordered by link ID.
    pub fn neighbors(&self, id: NodeId) -> Vec<(&SubstrateLink, NodeId)> {
        self.topology.incident(id)
    }

    pub fn link_between(&self, a: NodeId, b: NodeId) -> Option<&SubstrateLink> {
        self.topology.link_between(a, b)
    }

    /// Available amount of `kind` on a node, zero for unknown nodes.
    pub fn node_available(&self, id: NodeId, kind: ResourceKind) -> f64 {
        self.node(id)
            .map(|n| n.resources.available(kind))
            .unwrap_or(0.0)
    }

    /// Available amount of `kind` on a link, zero for unknown links.
    pub fn link_available(&self, id: LinkId, kind: ResourceKind) -> f64 {
        self.link(id)
            .map(|l| l.resources.available(kind))
            .unwrap_or(0.0)
    }

    /// Sum of the available bandwidth over the links incident to `id`.
    pub fn adjacent_bandwidth(&self, id: NodeId) -> f64 {
        self.neighbors(id)
            .iter()
            .map(|(l, _)| l.resources.available(ResourceKind::Bandwidth))
            .sum()
    }

    /// Returns a comparable snapshot of every resource's available amount.
    pub fn residual_state(&self) -> ResidualState {
        let nodes = self.nodes().flat_map(|n| {
            n.resources
                .iter()
                .map(move |r| ((Target::Node(n.id), r.kind()), r.available()))
        });
        let links = self.links().flat_map(|l| {
            l.resources
                .iter()
                .map(move |r| ((Target::Link(l.id), r.kind()), r.available()))
        });
        ResidualState {
            inner: nodes.chain(links).collect(),
        }
    }

    /// Average utilization of `kind` over all nodes (or links, for bandwidth) carrying it.
    pub fn utilization(&self, kind: ResourceKind) -> f64 {
        let resources = match kind {
            ResourceKind::Bandwidth => self
                .links()
                .filter_map(|l| l.resources.get(kind).copied())
                .collect::<Vec<_>>(),
            _ => self
                .nodes()
                .filter_map(|n| n.resources.get(kind).copied())
                .collect::<Vec<_>>(),
        };
        if resources.is_empty() {
            return 0.0;
        }
        resources.iter().map(|r| r.utilization()).sum::<f64>() / resources.len() as f64
    }

    /// Starts a reservation transaction on this substrate.
    pub fn transaction(&mut self) -> Transaction<'_> {
        Transaction {
            substrate: self,
            journal: Vec::new(),
            committed: false,
        }
    }

    /// Returns every reservation in `reservations` to the substrate, newest first. The whole
    /// batch is checked before anything is released: on `Err` the substrate is unchanged.
    pub fn release_all(&mut self, reservations: &[Reservation]) -> Result<(), ResourceError> {
        let mut totals: BTreeMap<(Target, ResourceKind), f64> = BTreeMap::new();
        for r in reservations {
            if r.amount <= EPSILON {
                continue;
            }
            *totals.entry((r.target, r.kind)).or_default() += r.amount;
        }
        for (&(target, kind), &amount) in &totals {
            self.resources(target)?.check_release(kind, amount)?;
        }
        for r in reservations.iter().rev() {
            self.resources_mut(r.target)?.release(r.kind, r.amount)?;
        }
        Ok(())
    }

    fn resources(&self, target: Target) -> Result<&Resources, ResourceError> {
        match target {
            Target::Node(id) => self.node(id).map(|n| &n.resources),
            Target::Link(id) => self.link(id).map(|l| &l.resources),
        }
        .ok_or(ResourceError::UnknownTarget(target))
    }

    fn resources_mut(&mut self, target: Target) -> Result<&mut Resources, ResourceError> {
        match target {
            Target::Node(id) => self.topology.node_mut(id).map(|n| &mut n.resources),
            Target::Link(id) => self.topology.link_mut(id).map(|l| &mut l.resources),
        }
        .ok_or(ResourceError::UnknownTarget(target))
    }

    delegate::delegate! {
        to self.topology {
            /// Nodes in ascending ID order.
            pub fn nodes(&self) -> impl Iterator<Item = &SubstrateNode>;

            /// Links in ascending ID order.
            pub fn links(&self) -> impl Iterator<Item = &SubstrateLink>;

            pub fn nr_nodes(&self) -> usize;

            pub fn nr_links(&self) -> usize;

            pub fn is_connected(&self) -> bool;
        }
    }
}

/// A journal of reservations against one substrate. Dropping a transaction that was not
/// committed releases everything it reserved, newest first, so an embedding attempt either
/// exists in full or leaves no trace.
#[derive(Debug)]
pub struct Transaction<'a> {
    substrate: &'a mut SubstrateNetwork,
    journal: Vec<Reservation>,
    committed: bool,
}

impl<'a> Transaction<'a> {
    /// The substrate as seen by this transaction, including its own reservations.
    pub fn substrate(&self) -> &SubstrateNetwork {
        self.substrate
    }

    pub fn reserve(
        &mut self,
        target: Target,
        kind: ResourceKind,
        amount: f64,
    ) -> Result<(), ResourceError> {
        self.substrate
            .resources_mut(target)?
            .reserve(kind, amount)?;
        self.journal.push(Reservation {
            target,
            kind,
            amount,
        });
        Ok(())
    }

    /// Reserves every demand on `target`. Either all of them are reserved or none is.
    pub fn reserve_all(&mut self, target: Target, demands: &[Demand]) -> Result<(), ResourceError> {
        let mark = self.journal.len();
        for d in demands {
            if let Err(e) = self.reserve(target, d.kind, d.amount) {
                self.undo_to(mark)?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// The reservations made so far.
    pub fn journal(&self) -> &[Reservation] {
        &self.journal
    }

    /// A mark to which the transaction can later be partially rolled back.
    pub fn savepoint(&self) -> usize {
        self.journal.len()
    }

    /// Releases every reservation made after `savepoint`.
    pub fn rollback_to(&mut self, savepoint: usize) -> Result<(), ResourceError> {
        self.undo_to(savepoint.min(self.journal.len()))
    }

    /// Makes every reservation permanent and hands the journal to the caller.
    pub fn commit(mut self) -> Vec<Reservation> {
        self.committed = true;
        std::mem::take(&mut self.journal)
    }

    /// Releases every reservation made through this transaction.
    pub fn rollback(mut self) -> Result<(), ResourceError> {
        self.committed = true;
        self.undo_to(0)
    }

    fn undo_to(&mut self, mark: usize) -> Result<(), ResourceError> {
        let undone = self.journal.split_off(mark);
        self.substrate.release_all(&undone)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = self.undo_to(0) {
                log::error!("failed to roll back reservations: {e}");
            }
        }
    }
}

/// A snapshot of the available amount of every substrate resource.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ResidualState {
    inner: BTreeMap<(Target, ResourceKind), f64>,
}

impl ResidualState {
    pub fn get(&self, target: Target, kind: ResourceKind) -> Option<f64> {
        self.inner.get(&(target, kind)).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn transaction_rolls_back_on_drop() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let before = substrate.residual_state();
        {
            let mut tx = substrate.transaction();
            tx.reserve(Target::Node(NodeId::new(0)), ResourceKind::Cpu, 4.0)?;
            tx.reserve(Target::Link(LinkId::new(0)), ResourceKind::Bandwidth, 5.0)?;
            assert_eq!(
                tx.substrate()
                    .node_available(NodeId::new(0), ResourceKind::Cpu),
                6.0
            );
        }
        assert_eq!(substrate.residual_state(), before);
        Ok(())
    }

    #[test]
    fn committed_reservations_stay() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let mut tx = substrate.transaction();
        tx.reserve(Target::Node(NodeId::new(1)), ResourceKind::Cpu, 4.0)?;
        let journal = tx.commit();
        assert_eq!(journal.len(), 1);
        assert_eq!(substrate.node_available(NodeId::new(1), ResourceKind::Cpu), 6.0);
        substrate.release_all(&journal)?;
        assert_eq!(substrate.node_available(NodeId::new(1), ResourceKind::Cpu), 10.0);
        Ok(())
    }

    #[test]
    fn reserve_all_is_all_or_nothing() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let mut tx = substrate.transaction();
        let demands = [
            Demand::new(ResourceKind::Cpu, 3.0),
            Demand::new(ResourceKind::Memory, 1.0), // no memory on this node
        ];
        let res = tx.reserve_all(Target::Node(NodeId::new(0)), &demands);
        assert!(matches!(res, Err(ResourceError::Missing(ResourceKind::Memory))));
        assert!(tx.journal().is_empty());
        assert_eq!(
            tx.substrate().node_available(NodeId::new(0), ResourceKind::Cpu),
            10.0
        );
        Ok(())
    }

    #[test]
    fn double_release_is_rejected() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let mut tx = substrate.transaction();
        tx.reserve(Target::Node(NodeId::new(0)), ResourceKind::Cpu, 2.0)?;
        let journal = tx.commit();
        substrate.release_all(&journal)?;
        assert!(matches!(
            substrate.release_all(&journal),
            Err(ResourceError::OverRelease { .. })
        ));
        assert_eq!(substrate.node_available(NodeId::new(0), ResourceKind::Cpu), 10.0);
        Ok(())
    }

    #[test]
    fn failed_release_leaves_the_substrate_untouched() -> anyhow::Result<()> {
        let mut substrate = testing::two_node_substrate();
        let mut tx = substrate.transaction();
        tx.reserve(Target::Node(NodeId::ZERO), ResourceKind::Cpu, 4.0)?;
        let mut journal = tx.commit();
        let before = substrate.residual_state();
        // Node 1 never had 100 CPU reserved
        journal.insert(
            0,
            Reservation {
                target: Target::Node(NodeId::new(1)),
                kind: ResourceKind::Cpu,
                amount: 100.0,
            },
        );
        assert!(matches!(
            substrate.release_all(&journal),
            Err(ResourceError::OverRelease { .. })
        ));
        assert_eq!(substrate.residual_state(), before);

        // Two halves that only overflow together
        let doubled = [journal[1], journal[1], journal[1]];
        assert!(substrate.release_all(&doubled).is_err());
        let unknown = [
            journal[1],
            Reservation {
                target: Target::Link(LinkId::new(9)),
                kind: ResourceKind::Bandwidth,
                amount: 1.0,
            },
        ];
        assert!(matches!(
            substrate.release_all(&unknown),
            Err(ResourceError::UnknownTarget(..))
        ));
        assert_eq!(substrate.residual_state(), before);

        substrate.release_all(&journal[1..])?;
        assert_eq!(substrate.node_available(NodeId::ZERO, ResourceKind::Cpu), 10.0);
        Ok(())
    }

    #[test]
    fn unknown_target_fails() {
        let mut substrate = testing::two_node_substrate();
        let mut tx = substrate.transaction();
        let res = tx.reserve(Target::Node(NodeId::new(42)), ResourceKind::Cpu, 1.0);
        assert!(matches!(res, Err(ResourceError::UnknownTarget(..))));
    }

    #[test]
    fn invalid_capacity_fails() {
        let nodes = [Node::with_cpu(NodeId::new(0), f64::NAN)];
        assert!(matches!(
            SubstrateNetwork::new(&nodes, &[]),
            Err(TopologyError::InvalidResources { .. })
        ));
    }
}
