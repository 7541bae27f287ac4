use crate::network::topology::{Topology, TopologyError};
use crate::network::types::{ResourceKind, VLink, VLinkId, VNode, VNodeId, VnId};

/// Embedding status of a virtual network within one trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Status {
    #[default]
    Unmapped,
    PartiallyAttempted,
    Mapped,
    Rejected,
}

/// A tenant's requested topology.
#[derive(Debug, Clone)]
pub struct VirtualNetwork {
    id: VnId,
    topology: Topology<VNode, VLink>,
    status: Status,
}

impl VirtualNetwork {
    /// Builds a virtual network. On top of the structural checks of `Topology::new`, a virtual
    /// network must be connected and its demands must be finite and non-negative.
    pub fn new(id: VnId, nodes: Vec<VNode>, links: Vec<VLink>) -> Result<Self, TopologyError> {
        let bad_demand = |ds: &[crate::resource::Demand]| {
            ds.iter()
                .find(|d| !(d.amount >= 0.0 && d.amount.is_finite()))
                .copied()
        };
        for n in &nodes {
            if let Some(d) = bad_demand(&n.demands) {
                return Err(TopologyError::invalid_resources(
                    format!("virtual node {}", n.id),
                    format!("{} demand {}", d.kind, d.amount),
                ));
            }
        }
        for l in &links {
            if let Some(d) = bad_demand(&l.demands) {
                return Err(TopologyError::invalid_resources(
                    format!("virtual link {}", l.id),
                    format!("{} demand {}", d.kind, d.amount),
                ));
            }
        }
        let topology = Topology::new(nodes, links)?;
        if !topology.is_connected() {
            return Err(TopologyError::Disconnected);
        }
        Ok(Self {
            id,
            topology,
            status: Status::Unmapped,
        })
    }

    pub fn id(&self) -> VnId {
        self.id
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub(crate) fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    pub fn node(&self, id: VNodeId) -> Option<&VNode> {
        self.topology.node(id)
    }

    pub fn link(&self, id: VLinkId) -> Option<&VLink> {
        self.topology.link(id)
    }

    /// Virtual links incident to `id` with their opposite endpoints.
    pub fn neighbors(&self, id: VNodeId) -> Vec<(&VLink, VNodeId)> {
        self.topology.incident(id)
    }

    /// Total demand of `kind` over all nodes and links.
    pub fn total_demand(&self, kind: ResourceKind) -> f64 {
        let nodes = self.nodes().map(|n| n.demand(kind)).sum::<f64>();
        let links = self
            .links()
            .map(|l| crate::resource::demand_of(&l.demands, kind))
            .sum::<f64>();
        nodes + links
    }

    delegate::delegate! {
        to self.topology {
            /// Virtual nodes in ascending ID order.
            pub fn nodes(&self) -> impl Iterator<Item = &VNode>;

            /// Virtual links in ascending ID order.
            pub fn links(&self) -> impl Iterator<Item = &VLink>;

            pub fn nr_nodes(&self) -> usize;

            pub fn nr_links(&self) -> usize;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnected_virtual_network_fails() {
        let nodes = (0..3)
            .map(|i| VNode::with_cpu(VNodeId::new(i), 1.0))
            .collect();
        let links = vec![VLink::new(
            VLinkId::new(0),
            VNodeId::new(0),
            VNodeId::new(1),
            1.0,
        )];
        let res = VirtualNetwork::new(VnId::ZERO, nodes, links);
        assert!(matches!(res, Err(TopologyError::Disconnected)));
    }

    #[test]
    fn single_node_virtual_network_is_connected() {
        let nodes = vec![VNode::with_cpu(VNodeId::new(0), 1.0)];
        assert!(VirtualNetwork::new(VnId::ZERO, nodes, Vec::new()).is_ok());
    }

    #[test]
    fn negative_demand_fails() {
        let nodes = vec![
            VNode::with_cpu(VNodeId::new(0), -1.0),
            VNode::with_cpu(VNodeId::new(1), 1.0),
        ];
        let links = vec![VLink::new(
            VLinkId::new(0),
            VNodeId::new(0),
            VNodeId::new(1),
            1.0,
        )];
        let res = VirtualNetwork::new(VnId::ZERO, nodes, links);
        assert!(matches!(res, Err(TopologyError::InvalidResources { .. })));
    }

    #[test]
    fn total_demand_sums_nodes_and_links() -> anyhow::Result<()> {
        let vn = crate::testing::pair_request(VnId::ZERO, 4.0, 5.0);
        assert_eq!(vn.total_demand(ResourceKind::Cpu), 8.0);
        assert_eq!(vn.total_demand(ResourceKind::Bandwidth), 5.0);
        assert_eq!(vn.status(), Status::Unmapped);
        Ok(())
    }
}
