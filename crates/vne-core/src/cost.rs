//! The hidden-hop cost model. A cost model turns a candidate (a single substrate node, or a
//! substrate path whose intermediate nodes are "hidden hops") into one scalar used to rank
//! candidates. Lower is better.

use std::fmt;

use crate::constants::EPSILON;
use crate::network::{LinkId, NodeId, ResourceKind, SubstrateNetwork};
use crate::search::Path;

/// Something a cost model can rank.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub substrate: &'a SubstrateNetwork,
    pub kind: CandidateKind<'a>,
}

/// The shape of a candidate.
#[derive(Debug, Clone, Copy)]
pub enum CandidateKind<'a> {
    /// A single substrate node (the zero-hop case).
    Node(NodeId),
    /// A sequence of links and the intermediate nodes between them.
    Path {
        links: &'a [LinkId],
        hidden: &'a [NodeId],
    },
}

impl<'a> Candidate<'a> {
    pub fn node(substrate: &'a SubstrateNetwork, node: NodeId) -> Self {
        Self {
            substrate,
            kind: CandidateKind::Node(node),
        }
    }

    pub fn path(substrate: &'a SubstrateNetwork, path: &'a Path) -> Self {
        Self {
            substrate,
            kind: CandidateKind::Path {
                links: &path.links,
                hidden: path.hidden_hops(),
            },
        }
    }

    pub fn link(substrate: &'a SubstrateNetwork, link: &'a LinkId) -> Self {
        Self {
            substrate,
            kind: CandidateKind::Path {
                links: std::slice::from_ref(link),
                hidden: &[],
            },
        }
    }
}

/// A pluggable cost function over candidates.
pub trait HiddenHopCost: fmt::Debug + Send + Sync {
    fn cost(&self, candidate: &Candidate<'_>) -> f64;
}

impl<T: HiddenHopCost + ?Sized> HiddenHopCost for &T {
    fn cost(&self, candidate: &Candidate<'_>) -> f64 {
        (**self).cost(candidate)
    }
}

fn inverse(weight: f64, residual: f64) -> f64 {
    if weight <= 0.0 {
        0.0
    } else if residual <= EPSILON {
        f64::INFINITY
    } else {
        weight / residual
    }
}

/// Ranks by hop count only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceCost;

impl HiddenHopCost for DistanceCost {
    fn cost(&self, candidate: &Candidate<'_>) -> f64 {
        match candidate.kind {
            CandidateKind::Node(_) => 0.0,
            CandidateKind::Path { links, .. } => links.len() as f64,
        }
    }
}

/// Ranks by inverse residual bandwidth, plus a penalty per hidden hop.
#[derive(Debug, Clone, Copy, Default, derive_new::new)]
pub struct BandwidthCost {
    pub hidden_hop_factor: f64,
}

impl HiddenHopCost for BandwidthCost {
    fn cost(&self, candidate: &Candidate<'_>) -> f64 {
        let s = candidate.substrate;
        match candidate.kind {
            CandidateKind::Node(n) => inverse(1.0, s.adjacent_bandwidth(n)),
            CandidateKind::Path { links, hidden } => {
                links
                    .iter()
                    .map(|&l| inverse(1.0, s.link_available(l, ResourceKind::Bandwidth)))
                    .sum::<f64>()
                    + self.hidden_hop_factor * hidden.len() as f64
            }
        }
    }
}

/// Ranks by weighted inverse residual bandwidth and CPU: `w_bw / bw + w_cpu / cpu`, with the
/// hidden hops of a path contributing their CPU term and a per-hop penalty.
#[derive(Debug, Clone, Copy, derive_new::new)]
pub struct BandwidthCpuCost {
    pub weight_cpu: f64,
    pub weight_bw: f64,
    pub hidden_hop_factor: f64,
}

impl Default for BandwidthCpuCost {
    fn default() -> Self {
        Self::new(1.0, 1.0, 0.0)
    }
}

impl HiddenHopCost for BandwidthCpuCost {
    fn cost(&self, candidate: &Candidate<'_>) -> f64 {
        let s = candidate.substrate;
        match candidate.kind {
            CandidateKind::Node(n) => {
                let cpu = inverse(self.weight_cpu, s.node_available(n, ResourceKind::Cpu));
                // Nodes without links only pay their CPU term
                let bw = match s.neighbors(n).is_empty() {
                    true => 0.0,
                    false => inverse(self.weight_bw, s.adjacent_bandwidth(n)),
                };
                cpu + bw
            }
            CandidateKind::Path { links, hidden } => {
                let bw = links
                    .iter()
                    .map(|&l| inverse(self.weight_bw, s.link_available(l, ResourceKind::Bandwidth)))
                    .sum::<f64>();
                let cpu = hidden
                    .iter()
                    .map(|&n| inverse(self.weight_cpu, s.node_available(n, ResourceKind::Cpu)))
                    .sum::<f64>();
                bw + cpu + self.hidden_hop_factor * hidden.len() as f64
            }
        }
    }
}

/// The configurable choice of cost model.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostKind {
    Distance,
    Bandwidth {
        hidden_hop_factor: f64,
    },
    BandwidthCpu {
        weight_cpu: f64,
        weight_bw: f64,
        hidden_hop_factor: f64,
    },
}

impl Default for CostKind {
    fn default() -> Self {
        CostKind::BandwidthCpu {
            weight_cpu: 1.0,
            weight_bw: 1.0,
            hidden_hop_factor: 0.0,
        }
    }
}

impl CostKind {
    /// CPU each hidden hop must supply per unit of routed bandwidth.
    pub fn hidden_hop_factor(&self) -> f64 {
        match *self {
            CostKind::Distance => 0.0,
            CostKind::Bandwidth { hidden_hop_factor }
            | CostKind::BandwidthCpu {
                hidden_hop_factor, ..
            } => hidden_hop_factor,
        }
    }
}

impl HiddenHopCost for CostKind {
    fn cost(&self, candidate: &Candidate<'_>) -> f64 {
        match *self {
            CostKind::Distance => DistanceCost.cost(candidate),
            CostKind::Bandwidth { hidden_hop_factor } => {
                BandwidthCost::new(hidden_hop_factor).cost(candidate)
            }
            CostKind::BandwidthCpu {
                weight_cpu,
                weight_bw,
                hidden_hop_factor,
            } => BandwidthCpuCost::new(weight_cpu, weight_bw, hidden_hop_factor).cost(candidate),
        }
    }
}
