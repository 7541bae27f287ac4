//! Small substrates and requests shared by tests across the workspace.

use crate::network::{
    Link, LinkId, Node, NodeId, SubstrateNetwork, VLink, VLinkId, VNode, VNodeId, VirtualNetwork,
    VnId,
};
use crate::scenario::{Request, Scenario};

fn substrate(nodes: &[Node], links: &[Link]) -> SubstrateNetwork {
    SubstrateNetwork::new(nodes, links).expect("fixture substrate is valid")
}

/// Two nodes with 10 CPU each, joined by one link with 10 bandwidth.
pub fn two_node_substrate() -> SubstrateNetwork {
    line_substrate(2, 10.0, 10.0)
}

/// `n` nodes in a line, node `i` joined to node `i + 1` by link `i`.
pub fn line_substrate(n: usize, cpu: f64, bandwidth: f64) -> SubstrateNetwork {
    line_substrate_with(&vec![cpu; n], bandwidth)
}

/// A line whose node `i` has `cpus[i]` CPU.
pub fn line_substrate_with(cpus: &[f64], bandwidth: f64) -> SubstrateNetwork {
    let nodes = cpus
        .iter()
        .enumerate()
        .map(|(i, &cpu)| Node::with_cpu(NodeId::new(i), cpu))
        .collect::<Vec<_>>();
    let links = (1..cpus.len())
        .map(|i| Link::new(LinkId::new(i - 1), NodeId::new(i - 1), NodeId::new(i), bandwidth))
        .collect::<Vec<_>>();
    substrate(&nodes, &links)
}

/// Four nodes with 10 CPU: two disjoint two-hop branches (over nodes 1 and 2) between nodes 0
/// and 3. Every link has 10 bandwidth.
pub fn diamond_substrate() -> SubstrateNetwork {
    let nodes = (0..4)
        .map(|i| Node::with_cpu(NodeId::new(i), 10.0))
        .collect::<Vec<_>>();
    let links = [(0, 1), (0, 2), (1, 3), (2, 3)]
        .into_iter()
        .enumerate()
        .map(|(i, (a, b))| Link::new(LinkId::new(i), NodeId::new(a), NodeId::new(b), 10.0))
        .collect::<Vec<_>>();
    substrate(&nodes, &links)
}

/// A `width` x `height` grid, nodes numbered row by row.
pub fn grid_substrate(width: usize, height: usize, cpu: f64, bandwidth: f64) -> SubstrateNetwork {
    let nodes = (0..width * height)
        .map(|i| Node::with_cpu(NodeId::new(i), cpu))
        .collect::<Vec<_>>();
    let mut pairs = Vec::new();
    for row in 0..height {
        for col in 0..width {
            let i = row * width + col;
            if col + 1 < width {
                pairs.push((i, i + 1));
            }
            if row + 1 < height {
                pairs.push((i, i + width));
            }
        }
    }
    let links = pairs
        .into_iter()
        .enumerate()
        .map(|(i, (a, b))| Link::new(LinkId::new(i), NodeId::new(a), NodeId::new(b), bandwidth))
        .collect::<Vec<_>>();
    substrate(&nodes, &links)
}

/// Two virtual nodes demanding `cpu` each, joined by a virtual link demanding `bandwidth`.
pub fn pair_request(id: VnId, cpu: f64, bandwidth: f64) -> VirtualNetwork {
    chain_request(id, 2, cpu, bandwidth)
}

/// `n` virtual nodes in a chain.
pub fn chain_request(id: VnId, n: usize, cpu: f64, bandwidth: f64) -> VirtualNetwork {
    let nodes = (0..n)
        .map(|i| VNode::with_cpu(VNodeId::new(i), cpu))
        .collect();
    let links = (1..n)
        .map(|i| VLink::new(VLinkId::new(i - 1), VNodeId::new(i - 1), VNodeId::new(i), bandwidth))
        .collect();
    VirtualNetwork::new(id, nodes, links).expect("fixture request is valid")
}

/// The two-node substrate as a scenario, with `requests` pair requests of 4 CPU per node and
/// `bandwidth` on their link.
pub fn pair_scenario(requests: usize, bandwidth: f64) -> Scenario {
    let nodes = vec![
        Node::with_cpu(NodeId::new(0), 10.0),
        Node::with_cpu(NodeId::new(1), 10.0),
    ];
    let links = vec![Link::new(LinkId::ZERO, NodeId::new(0), NodeId::new(1), 10.0)];
    let requests = (0..requests)
        .map(|i| {
            Request::builder()
                .id(VnId::new(i))
                .nodes(vec![
                    VNode::with_cpu(VNodeId::new(0), 4.0),
                    VNode::with_cpu(VNodeId::new(1), 4.0),
                ])
                .links(vec![VLink::new(
                    VLinkId::ZERO,
                    VNodeId::new(0),
                    VNodeId::new(1),
                    bandwidth,
                )])
                .build()
        })
        .collect();
    Scenario::builder()
        .nodes(nodes)
        .links(links)
        .requests(requests)
        .build()
}
