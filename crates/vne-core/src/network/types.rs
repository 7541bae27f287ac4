use std::fmt;
use std::hash::Hash;

use crate::resource::{Demand, Resources};

identifier!(NodeId, usize);
identifier!(LinkId, usize);
identifier!(VNodeId, usize);
identifier!(VLinkId, usize);
identifier!(VnId, usize);

/// The kind of a resource or a demand.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Bandwidth,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::Cpu => "cpu",
            ResourceKind::Memory => "memory",
            ResourceKind::Bandwidth => "bandwidth",
        };
        f.write_str(s)
    }
}

/// A declared capacity of a substrate node or link.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct Capacity {
    pub kind: ResourceKind,
    pub amount: f64,
}

/// A substrate node as declared in a scenario.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub capacities: Vec<Capacity>,
}

impl Node {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            capacities: Vec::new(),
        }
    }

    pub fn with(mut self, kind: ResourceKind, amount: f64) -> Self {
        self.capacities.push(Capacity::new(kind, amount));
        self
    }

    pub fn with_cpu(id: NodeId, cpu: f64) -> Self {
        Self::new(id).with(ResourceKind::Cpu, cpu)
    }
}

/// An undirected substrate link as declared in a scenario.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub a: NodeId,
    pub b: NodeId,
    #[serde(default)]
    pub capacities: Vec<Capacity>,
}

impl Link {
    pub fn new(id: LinkId, a: NodeId, b: NodeId, bandwidth: f64) -> Self {
        Self {
            id,
            a,
            b,
            capacities: vec![Capacity::new(ResourceKind::Bandwidth, bandwidth)],
        }
    }

    pub fn connects(&self, x: NodeId, y: NodeId) -> bool {
        self.a == x && self.b == y || self.a == y && self.b == x
    }
}

/// A virtual node together with its demands.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VNode {
    pub id: VNodeId,
    #[serde(default)]
    pub demands: Vec<Demand>,
}

impl VNode {
    pub fn with_cpu(id: VNodeId, cpu: f64) -> Self {
        Self {
            id,
            demands: vec![Demand::new(ResourceKind::Cpu, cpu)],
        }
    }

    pub fn demand(&self, kind: ResourceKind) -> f64 {
        crate::resource::demand_of(&self.demands, kind)
    }
}

/// A virtual link together with its demands.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VLink {
    pub id: VLinkId,
    pub a: VNodeId,
    pub b: VNodeId,
    #[serde(default)]
    pub demands: Vec<Demand>,
}

impl VLink {
    pub fn new(id: VLinkId, a: VNodeId, b: VNodeId, bandwidth: f64) -> Self {
        Self {
            id,
            a,
            b,
            demands: vec![Demand::new(ResourceKind::Bandwidth, bandwidth)],
        }
    }

    pub fn bandwidth(&self) -> f64 {
        crate::resource::demand_of(&self.demands, ResourceKind::Bandwidth)
    }
}

/// The substrate-side arena entry for a node: its identity and its mutable resource state.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstrateNode {
    pub id: NodeId,
    pub resources: Resources,
}

/// The substrate-side arena entry for a link.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstrateLink {
    pub id: LinkId,
    pub a: NodeId,
    pub b: NodeId,
    pub resources: Resources,
}

impl SubstrateLink {
    /// The endpoint opposite to `node`.
    pub fn other(&self, node: NodeId) -> NodeId {
        if self.a == node {
            self.b
        } else {
            self.a
        }
    }
}

/// Anything with a stable identifier that can live in a [`Topology`](super::topology::Topology).
pub trait Element {
    type Id: Copy + Eq + Ord + Hash + fmt::Display + fmt::Debug;

    fn id(&self) -> Self::Id;
}

/// An element that joins two nodes.
pub trait Joins<N>: Element {
    fn endpoints(&self) -> (N, N);
}

macro_rules! element_impl {
    ($ty: ty, $id: ty) => {
        impl Element for $ty {
            type Id = $id;

            fn id(&self) -> $id {
                self.id
            }
        }
    };
    ($ty: ty, $id: ty, $node: ty) => {
        element_impl!($ty, $id);

        impl Joins<$node> for $ty {
            fn endpoints(&self) -> ($node, $node) {
                (self.a, self.b)
            }
        }
    };
}

element_impl!(SubstrateNode, NodeId);
element_impl!(SubstrateLink, LinkId, NodeId);
element_impl!(VNode, VNodeId);
element_impl!(VLink, VLinkId, VNodeId);
