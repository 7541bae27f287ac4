use std::fmt;

use petgraph::graph::{EdgeIndex, NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;

use crate::network::types::{Element, Joins};

/// An undirected graph used as an arena: nodes and links are addressed by their stable IDs, and
/// the petgraph indices never change after construction.
#[derive(Debug, Clone)]
pub(crate) struct Topology<N: Element, E: Element> {
    pub(crate) graph: UnGraph<N, E>,
    node2idx: FxHashMap<N::Id, NodeIndex>,
    link2idx: FxHashMap<E::Id, EdgeIndex>,
}

impl<N, E> Topology<N, E>
where
    N: Element,
    E: Element + Joins<N::Id>,
{
    /// Creates a topology from a list of nodes and links. This function returns an error if the
    /// given elements fail to produce a valid topology.
    ///
    /// Correctness properties:
    ///
    /// - Every node must have a unique ID.
    /// - Every link must have a unique ID.
    /// - Every link must have distinct endpoints in `nodes`.
    /// - For any two nodes, there must be at most one link between them.
    pub(crate) fn new(nodes: Vec<N>, links: Vec<E>) -> Result<Self, TopologyError> {
        let mut g = UnGraph::default();
        let mut node2idx = FxHashMap::default();
        for n in nodes {
            let id = n.id();
            let idx = g.add_node(n);
            if node2idx.insert(id, idx).is_some() {
                // CORRECTNESS: Every node must have a unique ID.
                return Err(TopologyError::DuplicateNodeId(id.to_string()));
            }
        }
        let mut link2idx = FxHashMap::default();
        for l in links {
            let id = l.id();
            let (a, b) = l.endpoints();
            // CORRECTNESS: Every link must have distinct endpoints in `nodes`.
            if a == b {
                return Err(TopologyError::NodeAdjacentSelf(a.to_string()));
            }
            let ia = *node2idx
                .get(&a)
                .ok_or_else(|| TopologyError::UndeclaredNode(a.to_string()))?;
            let ib = *node2idx
                .get(&b)
                .ok_or_else(|| TopologyError::UndeclaredNode(b.to_string()))?;
            // CORRECTNESS: For any two nodes, there must be at most one link between them.
            if g.find_edge(ia, ib).is_some() {
                return Err(TopologyError::DuplicateLink {
                    n1: a.to_string(),
                    n2: b.to_string(),
                });
            }
            let eidx = g.add_edge(ia, ib, l);
            // CORRECTNESS: Every link must have a unique ID.
            if link2idx.insert(id, eidx).is_some() {
                return Err(TopologyError::DuplicateLinkId(id.to_string()));
            }
        }
        Ok(Self {
            graph: g,
            node2idx,
            link2idx,
        })
    }

    pub(crate) fn node(&self, id: N::Id) -> Option<&N> {
        self.node2idx.get(&id).map(|&idx| &self.graph[idx])
    }

    pub(crate) fn node_mut(&mut self, id: N::Id) -> Option<&mut N> {
        self.node2idx.get(&id).map(|&idx| &mut self.graph[idx])
    }

    pub(crate) fn link(&self, id: E::Id) -> Option<&E> {
        self.link2idx.get(&id).map(|&idx| &self.graph[idx])
    }

    pub(crate) fn link_mut(&mut self, id: E::Id) -> Option<&mut E> {
        self.link2idx.get(&id).map(|&idx| &mut self.graph[idx])
    }

    /// Nodes in ascending ID order.
    pub(crate) fn nodes(&self) -> impl Iterator<Item = &N> {
        let mut nodes = self.graph.node_weights().collect::<Vec<_>>();
        nodes.sort_by_key(|n| n.id());
        nodes.into_iter()
    }

    /// Links in ascending ID order.
    pub(crate) fn links(&self) -> impl Iterator<Item = &E> {
        let mut links = self.graph.edge_weights().collect::<Vec<_>>();
        links.sort_by_key(|l| l.id());
        links.into_iter()
    }

    /// The links incident to `id` together with the opposite endpoint, ordered by link ID.
    pub(crate) fn incident(&self, id: N::Id) -> Vec<(&E, N::Id)> {
        let Some(&idx) = self.node2idx.get(&id) else {
            return Vec::new();
        };
        let mut acc = self
            .graph
            .edges(idx)
            .map(|e| {
                let other = if e.source() == idx {
                    e.target()
                } else {
                    e.source()
                };
                (e.weight(), self.graph[other].id())
            })
            .collect::<Vec<_>>();
        acc.sort_by_key(|(l, _)| l.id());
        acc
    }

    pub(crate) fn link_between(&self, a: N::Id, b: N::Id) -> Option<&E> {
        let ia = *self.node2idx.get(&a)?;
        let ib = *self.node2idx.get(&b)?;
        self.graph.find_edge(ia, ib).map(|e| &self.graph[e])
    }

    pub(crate) fn is_connected(&self) -> bool {
        petgraph::algo::connected_components(&self.graph) <= 1
    }

    pub(crate) fn nr_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub(crate) fn nr_links(&self) -> usize {
        self.graph.edge_count()
    }
}

/// Topology construction errors. IDs are rendered as strings so that one error type serves
/// both substrate and virtual topologies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Duplicate node ID {0}")]
    DuplicateNodeId(String),

    #[error("Duplicate link ID {0}")]
    DuplicateLinkId(String),

    #[error("Node {0} is connected to itself")]
    NodeAdjacentSelf(String),

    #[error("Node {0} is not declared")]
    UndeclaredNode(String),

    #[error("Duplicate links between {n1} and {n2}")]
    DuplicateLink { n1: String, n2: String },

    #[error("Network is not connected")]
    Disconnected,

    #[error("Invalid resources on {entity}: {reason}")]
    InvalidResources { entity: String, reason: String },
}

impl TopologyError {
    pub(crate) fn invalid_resources(entity: impl fmt::Display, reason: impl fmt::Display) -> Self {
        Self::InvalidResources {
            entity: entity.to_string(),
            reason: reason.to_string(),
        }
    }
}
