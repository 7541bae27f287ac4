//! Ranked path enumeration and flow splitting over the substrate's residual capacities.

use ordered_float::OrderedFloat;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::constants::EPSILON;
use crate::cost::{Candidate, HiddenHopCost};
use crate::network::{LinkId, NodeId, ResourceKind, SubstrateNetwork};

// Link weights are clamped into this range so that the layered search never relaxes through a
// zero or infinite weight.
const MAX_WEIGHT: f64 = 1e12;

/// A simple path through the substrate. `nodes` has one more element than `links`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct Path {
    pub nodes: Vec<NodeId>,
    pub links: Vec<LinkId>,
}

impl Path {
    /// The zero-hop path that stays on `node`.
    pub fn trivial(node: NodeId) -> Self {
        Self::new(vec![node], Vec::new())
    }

    pub fn hops(&self) -> usize {
        self.links.len()
    }

    /// The intermediate nodes of the path.
    pub fn hidden_hops(&self) -> &[NodeId] {
        match self.nodes.len() {
            0..=2 => &[],
            n => &self.nodes[1..n - 1],
        }
    }
}

/// Part of a split flow: `amount` units of bandwidth routed over `path`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FlowPart {
    pub path: Path,
    pub amount: f64,
}

/// Path search options.
#[derive(Debug, Clone, Copy, PartialEq, typed_builder::TypedBuilder)]
pub struct SearchOpts {
    /// Maximum number of paths to enumerate.
    #[builder(default = 1)]
    pub k: usize,
    /// Maximum number of hops of a path. `None` means unbounded.
    #[builder(default)]
    pub max_distance: Option<usize>,
    /// CPU every hidden hop must supply per unit of bandwidth.
    #[builder(default)]
    pub hidden_hop_factor: f64,
}

impl Default for SearchOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// The substrate nodes a search may use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    All,
    Only(FxHashSet<NodeId>),
}

impl Scope {
    pub fn contains(&self, node: NodeId) -> bool {
        match self {
            Scope::All => true,
            Scope::Only(nodes) => nodes.contains(&node),
        }
    }
}

impl FromIterator<NodeId> for Scope {
    fn from_iter<T: IntoIterator<Item = NodeId>>(iter: T) -> Self {
        Scope::Only(iter.into_iter().collect())
    }
}

/// Returns up to `opts.k` least-cost simple paths from `src` to `dst` whose every link has at
/// least `bandwidth` residual bandwidth and whose every hidden hop can supply
/// `opts.hidden_hop_factor * bandwidth` CPU. Paths are ordered by full path cost; equal costs
/// keep discovery order. The result is empty if no such path exists within `opts.max_distance`.
pub fn k_shortest_paths(
    substrate: &SubstrateNetwork,
    src: NodeId,
    dst: NodeId,
    bandwidth: f64,
    opts: &SearchOpts,
    cost: &dyn HiddenHopCost,
    scope: &Scope,
) -> Vec<Path> {
    let view = ResidualView::new(substrate, scope, opts.hidden_hop_factor);
    let mut paths = yen(&view, src, dst, bandwidth, opts, cost);
    let mut ranked = paths
        .drain(..)
        .map(|p| (cost.cost(&Candidate::path(substrate, &p)), p))
        .collect::<Vec<_>>();
    // `sort_by_key` is stable, so ties keep discovery order
    ranked.sort_by_key(|(c, _)| OrderedFloat(*c));
    ranked.into_iter().map(|(_, p)| p).collect()
}

/// Distributes `demand` units of bandwidth from `src` to `dst` over several paths. Each round
/// enumerates up to `opts.k` paths on the residual network left by earlier rounds and gives each
/// path `min(remaining, bottleneck)`. Returns an empty vector if the demand cannot be carried in
/// full.
pub fn split_flow(
    substrate: &SubstrateNetwork,
    src: NodeId,
    dst: NodeId,
    demand: f64,
    opts: &SearchOpts,
    cost: &dyn HiddenHopCost,
    scope: &Scope,
) -> Vec<FlowPart> {
    if demand <= EPSILON || src == dst {
        let path = k_shortest_paths(substrate, src, dst, demand, opts, cost, scope);
        return path
            .into_iter()
            .take(1)
            .map(|path| FlowPart {
                path,
                amount: demand,
            })
            .collect();
    }
    let mut view = ResidualView::new(substrate, scope, opts.hidden_hop_factor);
    let mut parts: Vec<FlowPart> = Vec::new();
    let mut remaining = demand;
    // Every round saturates at least one link or hidden hop, or finishes
    for _ in 0..=substrate.nr_links() + substrate.nr_nodes() {
        let paths = yen(&view, src, dst, 2.0 * EPSILON, opts, cost);
        if paths.is_empty() {
            break;
        }
        for path in paths {
            let amount = remaining.min(view.bottleneck(&path));
            if amount <= EPSILON {
                continue;
            }
            view.consume(&path, amount);
            remaining -= amount;
            match parts.iter_mut().find(|p| p.path == path) {
                Some(part) => part.amount += amount,
                None => parts.push(FlowPart { path, amount }),
            }
            if remaining <= EPSILON {
                return parts;
            }
        }
    }
    Vec::new()
}

/// The substrate's residual capacities minus what an ongoing flow computation has used.
#[derive(Debug)]
struct ResidualView<'a> {
    substrate: &'a SubstrateNetwork,
    scope: &'a Scope,
    hidden_hop_factor: f64,
    used_bw: FxHashMap<LinkId, f64>,
    used_cpu: FxHashMap<NodeId, f64>,
}

impl<'a> ResidualView<'a> {
    fn new(substrate: &'a SubstrateNetwork, scope: &'a Scope, hidden_hop_factor: f64) -> Self {
        Self {
            substrate,
            scope,
            hidden_hop_factor,
            used_bw: FxHashMap::default(),
            used_cpu: FxHashMap::default(),
        }
    }

    fn link_residual(&self, link: LinkId) -> f64 {
        self.substrate.link_available(link, ResourceKind::Bandwidth)
            - self.used_bw.get(&link).copied().unwrap_or(0.0)
    }

    fn cpu_residual(&self, node: NodeId) -> f64 {
        self.substrate.node_available(node, ResourceKind::Cpu)
            - self.used_cpu.get(&node).copied().unwrap_or(0.0)
    }

    fn can_relay(&self, node: NodeId, bandwidth: f64) -> bool {
        self.hidden_hop_factor <= 0.0
            || self.cpu_residual(node) + EPSILON >= self.hidden_hop_factor * bandwidth
    }

    /// The largest amount `path` can still carry.
    fn bottleneck(&self, path: &Path) -> f64 {
        let links = path
            .links
            .iter()
            .map(|&l| self.link_residual(l))
            .fold(f64::INFINITY, f64::min);
        let hops = match self.hidden_hop_factor > 0.0 {
            true => path
                .hidden_hops()
                .iter()
                .map(|&n| self.cpu_residual(n) / self.hidden_hop_factor)
                .fold(f64::INFINITY, f64::min),
            false => f64::INFINITY,
        };
        links.min(hops).max(0.0)
    }

    fn consume(&mut self, path: &Path, amount: f64) {
        for &l in &path.links {
            *self.used_bw.entry(l).or_default() += amount;
        }
        if self.hidden_hop_factor > 0.0 {
            for &n in path.hidden_hops() {
                *self.used_cpu.entry(n).or_default() += amount * self.hidden_hop_factor;
            }
        }
    }
}

/// Yen's ranked path enumeration on top of a hop-bounded shortest-path search.
fn yen(
    view: &ResidualView<'_>,
    src: NodeId,
    dst: NodeId,
    bandwidth: f64,
    opts: &SearchOpts,
    cost: &dyn HiddenHopCost,
) -> Vec<Path> {
    if opts.k == 0 || !view.scope.contains(src) || !view.scope.contains(dst) {
        return Vec::new();
    }
    if src == dst {
        return vec![Path::trivial(src)];
    }
    let max_hops = opts
        .max_distance
        .unwrap_or_else(|| view.substrate.nr_nodes().saturating_sub(1));
    let weight = |l: LinkId| {
        let w = cost.cost(&Candidate::link(view.substrate, &l));
        if w.is_nan() {
            MAX_WEIGHT
        } else {
            w.clamp(EPSILON, MAX_WEIGHT)
        }
    };
    let search = HopBounded {
        view,
        bandwidth,
        weight: &weight,
    };
    let Some(first) = search.shortest(src, dst, max_hops, &FxHashSet::default(), &FxHashSet::default())
    else {
        return Vec::new();
    };
    let mut found = vec![first];
    // (cost, discovery sequence, path)
    let mut candidates: Vec<(f64, usize, Path)> = Vec::new();
    let mut seq = 0;
    while found.len() < opts.k {
        let prev = &found[found.len() - 1].1;
        for i in 0..prev.links.len() {
            let spur = prev.nodes[i];
            let root_nodes = &prev.nodes[..=i];
            let root_links = &prev.links[..i];
            let mut banned_links = FxHashSet::default();
            for (_, p) in &found {
                if p.nodes.len() > i + 1 && p.nodes[..=i] == *root_nodes {
                    banned_links.insert(p.links[i]);
                }
            }
            let banned_nodes = root_nodes[..i].iter().copied().collect();
            let Some((spur_cost, spur_path)) =
                search.shortest(spur, dst, max_hops - i, &banned_nodes, &banned_links)
            else {
                continue;
            };
            let root_cost = root_links.iter().map(|&l| weight(l)).sum::<f64>();
            let mut nodes = root_nodes.to_vec();
            nodes.extend_from_slice(&spur_path.nodes[1..]);
            let mut links = root_links.to_vec();
            links.extend_from_slice(&spur_path.links);
            let path = Path::new(nodes, links);
            if found.iter().any(|(_, p)| *p == path) || candidates.iter().any(|(_, _, p)| *p == path)
            {
                continue;
            }
            candidates.push((root_cost + spur_cost, seq, path));
            seq += 1;
        }
        let Some(best) = candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, (c, s, _))| (OrderedFloat(*c), *s))
            .map(|(i, _)| i)
        else {
            break;
        };
        let (c, _, path) = candidates.swap_remove(best);
        found.push((c, path));
    }
    found.into_iter().map(|(_, p)| p).collect()
}

/// Hop-bounded least-weight path search. Runs a layered Bellman-Ford so that the hop bound is
/// exact: layer `h` holds the cheapest known way to reach each node in exactly `h` hops, and a
/// label is dropped when an earlier layer already reaches the node at no greater weight.
struct HopBounded<'a, 'b, W: Fn(LinkId) -> f64> {
    view: &'a ResidualView<'b>,
    bandwidth: f64,
    weight: &'a W,
}

impl<W: Fn(LinkId) -> f64> HopBounded<'_, '_, W> {
    fn shortest(
        &self,
        src: NodeId,
        dst: NodeId,
        max_hops: usize,
        banned_nodes: &FxHashSet<NodeId>,
        banned_links: &FxHashSet<LinkId>,
    ) -> Option<(f64, Path)> {
        let substrate = self.view.substrate;
        // layers[h][v] = (weight, predecessor, link)
        let mut layers: Vec<FxHashMap<NodeId, (f64, NodeId, LinkId)>> = Vec::new();
        let mut best: FxHashMap<NodeId, f64> = FxHashMap::default();
        best.insert(src, 0.0);
        let mut frontier = vec![(src, 0.0)];
        let mut reached: Option<(f64, usize)> = None;
        for hop in 1..=max_hops {
            let mut layer: FxHashMap<NodeId, (f64, NodeId, LinkId)> = FxHashMap::default();
            for &(u, wu) in &frontier {
                // Only the source and the destination may skip the relay check
                if u != src && !self.view.can_relay(u, self.bandwidth) {
                    continue;
                }
                for (link, v) in substrate.neighbors(u) {
                    if banned_links.contains(&link.id)
                        || banned_nodes.contains(&v)
                        || v == src
                        || !self.view.scope.contains(v)
                        || self.view.link_residual(link.id) + EPSILON < self.bandwidth
                    {
                        continue;
                    }
                    let wv = wu + (self.weight)(link.id);
                    if best.get(&v).is_some_and(|&b| wv >= b) {
                        continue;
                    }
                    if layer.get(&v).map_or(true, |&(b, _, _)| wv < b) {
                        layer.insert(v, (wv, u, link.id));
                    }
                }
            }
            if layer.is_empty() {
                break;
            }
            let mut next = layer.iter().map(|(&v, &(w, _, _))| (v, w)).collect::<Vec<_>>();
            next.sort_by_key(|&(v, _)| v);
            for &(v, w) in &next {
                best.insert(v, w);
            }
            if let Some(&(w, _, _)) = layer.get(&dst) {
                if reached.map_or(true, |(b, _)| w < b) {
                    reached = Some((w, hop));
                }
            }
            layers.push(layer);
            // Paths do not continue through the destination
            next.retain(|&(v, _)| v != dst);
            frontier = next;
        }
        let (total, hops) = reached?;
        let mut nodes = vec![dst];
        let mut links = Vec::with_capacity(hops);
        let mut cur = dst;
        for layer in layers[..hops].iter().rev() {
            let &(_, pred, link) = layer.get(&cur)?;
            links.push(link);
            nodes.push(pred);
            cur = pred;
        }
        nodes.reverse();
        links.reverse();
        Some((total, Path::new(nodes, links)))
    }
}
