//! A hierarchy of substrate regions. Level 0 is the whole substrate; every region of level `l`
//! is split into `partitions` connected regions of level `l + 1` by growing them breadth-first
//! from spread-out seeds, one node per region per round.

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::network::{NodeId, ResourceKind, SubstrateNetwork};

identifier!(RegionId, usize);

/// A connected set of substrate nodes at one level of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Region {
    pub id: RegionId,
    pub level: usize,
    pub parent: Option<RegionId>,
    /// Members in ascending ID order.
    pub nodes: Vec<NodeId>,
    /// The member of highest degree, lowest ID on ties.
    pub delegation: NodeId,
}

impl Region {
    /// Available CPU over all members.
    pub fn residual_cpu(&self, substrate: &SubstrateNetwork) -> f64 {
        self.nodes
            .iter()
            .map(|&n| substrate.node_available(n, ResourceKind::Cpu))
            .sum()
    }
}

/// Regions of every level, parents before children.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    regions: Vec<Region>,
}

impl Hierarchy {
    /// Builds the hierarchy down to `max_level`. A region is only split if every part ends up
    /// with at least `min_partition_size` nodes.
    pub fn build(
        substrate: &SubstrateNetwork,
        partitions: usize,
        min_partition_size: usize,
        max_level: usize,
    ) -> Self {
        let all = substrate.nodes().map(|n| n.id).collect::<Vec<_>>();
        let mut regions = Vec::new();
        if all.is_empty() {
            return Self { regions };
        }
        regions.push(Region {
            id: RegionId::ZERO,
            level: 0,
            parent: None,
            delegation: delegation_node(substrate, &all),
            nodes: all,
        });
        let min_size = min_partition_size.max(1);
        let mut next = 0;
        while next < regions.len() {
            let parent = regions[next].clone();
            next += 1;
            if parent.level >= max_level
                || partitions < 2
                || parent.nodes.len() < partitions.saturating_mul(min_size)
            {
                continue;
            }
            let parts = split(substrate, &parent.nodes, partitions);
            if parts.iter().any(|p| p.len() < min_size) {
                log::trace!(
                    "region {} not split: a part is below {min_size} node(s)",
                    parent.id
                );
                continue;
            }
            for nodes in parts {
                regions.push(Region {
                    id: RegionId::new(regions.len()),
                    level: parent.level + 1,
                    parent: Some(parent.id),
                    delegation: delegation_node(substrate, &nodes),
                    nodes,
                });
            }
        }
        Self { regions }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Regions at exactly `level`.
    pub fn level(&self, level: usize) -> impl Iterator<Item = &Region> {
        self.regions.iter().filter(move |r| r.level == level)
    }

    pub fn depth(&self) -> usize {
        self.regions.iter().map(|r| r.level).max().unwrap_or(0)
    }

    /// Delegation nodes of every region at a level `<= level`, ascending.
    pub fn full_knowledge_nodes(&self, level: usize) -> Vec<NodeId> {
        let mut nodes = self
            .regions
            .iter()
            .filter(|r| r.level <= level)
            .map(|r| r.delegation)
            .collect::<Vec<_>>();
        nodes.sort();
        nodes.dedup();
        nodes
    }
}

fn delegation_node(substrate: &SubstrateNetwork, nodes: &[NodeId]) -> NodeId {
    nodes
        .iter()
        .copied()
        .max_by_key(|&n| (substrate.neighbors(n).len(), std::cmp::Reverse(n)))
        .unwrap_or_default()
}

/// Splits `nodes` into at most `k` connected parts of similar size.
fn split(substrate: &SubstrateNetwork, nodes: &[NodeId], k: usize) -> Vec<Vec<NodeId>> {
    let members = nodes.iter().copied().collect::<FxHashSet<_>>();
    let neighbors = |n: NodeId| {
        substrate
            .neighbors(n)
            .into_iter()
            .map(|(_, m)| m)
            .filter(|m| members.contains(m))
            .collect::<Vec<_>>()
    };
    // Seeds: the delegation node first, then repeatedly the node farthest from all seeds
    let mut seeds = vec![delegation_node(substrate, nodes)];
    while seeds.len() < k {
        let dist = bfs_distances(&seeds, &neighbors);
        let far = nodes
            .iter()
            .copied()
            .filter(|n| !seeds.contains(n))
            .max_by_key(|n| (dist.get(n).copied().unwrap_or(usize::MAX), std::cmp::Reverse(*n)));
        match far {
            Some(n) => seeds.push(n),
            None => break,
        }
    }
    let mut owner: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut parts = seeds.iter().map(|&s| vec![s]).collect::<Vec<_>>();
    let mut frontiers = seeds
        .iter()
        .map(|&s| VecDeque::from([s]))
        .collect::<Vec<_>>();
    for (i, &s) in seeds.iter().enumerate() {
        owner.insert(s, i);
    }
    // Round robin: each part claims one unowned neighbor per round
    let mut grew = true;
    while grew {
        grew = false;
        for i in 0..parts.len() {
            while let Some(&front) = frontiers[i].front() {
                let claim = neighbors(front)
                    .into_iter()
                    .filter(|m| !owner.contains_key(m))
                    .min();
                match claim {
                    Some(m) => {
                        owner.insert(m, i);
                        parts[i].push(m);
                        frontiers[i].push_back(m);
                        grew = true;
                        break;
                    }
                    None => {
                        frontiers[i].pop_front();
                    }
                }
            }
        }
    }
    // Nodes unreachable from every seed join the smallest part
    for &n in nodes {
        if !owner.contains_key(&n) {
            if let Some(i) = (0..parts.len()).min_by_key(|&i| (parts[i].len(), i)) {
                owner.insert(n, i);
                parts[i].push(n);
            }
        }
    }
    for p in &mut parts {
        p.sort();
    }
    parts
}

fn bfs_distances<F>(sources: &[NodeId], neighbors: &F) -> FxHashMap<NodeId, usize>
where
    F: Fn(NodeId) -> Vec<NodeId>,
{
    let mut dist = sources.iter().map(|&s| (s, 0)).collect::<FxHashMap<_, _>>();
    let mut queue = sources.iter().copied().collect::<VecDeque<_>>();
    while let Some(n) = queue.pop_front() {
        let d = dist[&n];
        for m in neighbors(n) {
            if !dist.contains_key(&m) {
                dist.insert(m, d + 1);
                queue.push_back(m);
            }
        }
    }
    dist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Link, LinkId, Node};
    use crate::testing;

    fn ids(nodes: &[NodeId]) -> Vec<usize> {
        nodes.iter().map(|n| n.inner()).collect()
    }

    #[test]
    fn line_splits_in_halves() {
        let s = testing::line_substrate(6, 10.0, 10.0);
        let h = Hierarchy::build(&s, 2, 1, 1);
        let parts = h.level(1).map(|r| ids(&r.nodes)).collect::<Vec<_>>();
        // Seeds are node 1 (first of highest degree) and node 5 (farthest from it)
        assert_eq!(parts, vec![vec![0, 1, 2], vec![3, 4, 5]]);
        assert_eq!(h.depth(), 1);
    }

    #[test]
    fn regions_cover_every_node_once() {
        let s = testing::grid_substrate(4, 4, 10.0, 10.0);
        let h = Hierarchy::build(&s, 4, 2, 2);
        for level in 1..=h.depth() {
            let mut all = h.level(level).flat_map(|r| ids(&r.nodes)).collect::<Vec<_>>();
            all.sort();
            // Every level of a complete split partitions the substrate
            if h.level(level).count() == 4usize.pow(level as u32) {
                assert_eq!(all, (0..16).collect::<Vec<_>>());
            }
        }
        let level1 = h.level(1).map(|r| r.nodes.len()).collect::<Vec<_>>();
        assert_eq!(level1.iter().sum::<usize>(), 16);
        assert!(level1.iter().all(|&n| n >= 2));
    }

    #[test]
    fn small_regions_are_not_split() {
        let s = testing::line_substrate(5, 10.0, 10.0);
        let h = Hierarchy::build(&s, 2, 3, 3);
        assert_eq!(h.regions().len(), 1);
        assert_eq!(h.full_knowledge_nodes(0), vec![NodeId::new(1)]);
    }

    #[test]
    fn huge_partition_counts_do_not_split() {
        let s = testing::line_substrate(6, 10.0, 10.0);
        let h = Hierarchy::build(&s, usize::MAX / 2 + 1, 3, 1);
        assert_eq!(h.regions().len(), 1);
        assert_eq!(h.depth(), 0);
    }

    #[test]
    fn uneven_splits_are_refused() -> anyhow::Result<()> {
        // A star: node 0 in the center, leaves 1 to 5
        let nodes = (0..6)
            .map(|i| Node::with_cpu(NodeId::new(i), 10.0))
            .collect::<Vec<_>>();
        let links = (1..6)
            .map(|i| Link::new(LinkId::new(i - 1), NodeId::ZERO, NodeId::new(i), 10.0))
            .collect::<Vec<_>>();
        let s = SubstrateNetwork::new(&nodes, &links)?;
        let h = Hierarchy::build(&s, 2, 3, 1);
        assert!(h.regions().iter().skip(1).all(|r| r.nodes.len() >= 3));
        // The center claims every leaf before the second seed can grow
        assert_eq!(h.regions().len(), 1);
        Ok(())
    }

    #[test]
    fn child_regions_respect_the_minimum_size() {
        for (partitions, min) in [(2, 2), (3, 2), (4, 3), (2, 5)] {
            let s = testing::grid_substrate(5, 4, 10.0, 10.0);
            let h = Hierarchy::build(&s, partitions, min, 3);
            for r in h.regions().iter().filter(|r| r.level > 0) {
                assert!(r.nodes.len() >= min, "{partitions} parts, min {min}: {r:?}");
            }
        }
    }

    #[test]
    fn delegation_prefers_degree_then_id() {
        let s = testing::grid_substrate(3, 3, 10.0, 10.0);
        let h = Hierarchy::build(&s, 2, 1, 0);
        // The center of a 3x3 grid has degree 4
        assert_eq!(h.regions()[0].delegation, NodeId::new(4));
    }
}
