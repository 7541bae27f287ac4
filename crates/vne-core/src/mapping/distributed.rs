use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::constants::{INNER_K, INNER_MAX_DISTANCE};
use crate::cost::CostKind;
use crate::mapping::partition::{Hierarchy, Region};
use crate::mapping::{Greedy, GreedyOpts, MappingAlgo, MappingError, Outcome, RejectReason};
use crate::network::{NodeId, SubstrateNetwork, VirtualNetwork};
use crate::search::Scope;

/// Partitioned mapping options.
#[derive(
    Debug, Clone, Copy, PartialEq, typed_builder::TypedBuilder, serde::Serialize, serde::Deserialize,
)]
pub struct DistributedOpts {
    /// Bandwidth weight (omega) of the inner cost model. The CPU weight is 1.
    #[builder(default = 1.0)]
    pub bandwidth_weight: f64,
    /// Deepest hierarchy level whose regions are tried.
    #[builder(default = 1)]
    pub delegation_nodes_level: usize,
    /// Delegation nodes of regions up to this level are visible to every region.
    #[builder(default = 0)]
    pub full_knowledge_nodes_level: usize,
    /// Number of parts a region is split into.
    #[builder(default = 2)]
    pub partitions: usize,
    /// Regions are only split if every part gets at least this many nodes.
    #[builder(default = 2)]
    pub min_partition_size: usize,
    /// Depth of the hierarchy.
    #[builder(default = 1)]
    pub max_level: usize,
}

impl Default for DistributedOpts {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Maps a request inside one region of a substrate partition hierarchy at a time, plus the
/// full-knowledge nodes every region sees. Regions are tried deepest level first, then by
/// descending residual CPU; the first region that accepts the request wins.
#[derive(Debug, Clone, derive_new::new)]
pub struct Distributed {
    opts: DistributedOpts,
}

impl Distributed {
    pub fn opts(&self) -> &DistributedOpts {
        &self.opts
    }

    fn inner(&self) -> GreedyOpts {
        GreedyOpts::builder()
            .k(INNER_K)
            .max_distance(Some(INNER_MAX_DISTANCE))
            .cost(CostKind::BandwidthCpu {
                weight_cpu: 1.0,
                weight_bw: self.opts.bandwidth_weight,
                hidden_hop_factor: 0.0,
            })
            .build()
    }

    /// Regions in the order they are tried.
    fn candidates<'h>(
        &self,
        hierarchy: &'h Hierarchy,
        substrate: &SubstrateNetwork,
    ) -> Vec<&'h Region> {
        let deepest = self.opts.delegation_nodes_level.min(self.opts.max_level);
        let mut regions = hierarchy
            .regions()
            .iter()
            .filter(|r| r.level <= deepest)
            .map(|r| (r, r.residual_cpu(substrate)))
            .collect::<Vec<_>>();
        regions.sort_by_key(|&(r, cpu)| (Reverse(r.level), Reverse(OrderedFloat(cpu)), r.id));
        regions.into_iter().map(|(r, _)| r).collect()
    }
}

impl MappingAlgo for Distributed {
    fn map_network(
        &self,
        substrate: &mut SubstrateNetwork,
        vn: &VirtualNetwork,
    ) -> Result<Outcome, MappingError> {
        let hierarchy = Hierarchy::build(
            substrate,
            self.opts.partitions,
            self.opts.min_partition_size,
            self.opts.max_level,
        );
        let full_knowledge = hierarchy.full_knowledge_nodes(self.opts.full_knowledge_nodes_level);
        let regions = self.candidates(&hierarchy, substrate);
        let mut last = RejectReason::NoRegion;
        for region in regions {
            let scope = region_scope(region, &full_knowledge);
            let greedy = Greedy::new(self.inner()).with_scope(scope);
            match greedy.map_network(substrate, vn)? {
                Outcome::Mapped(e) => {
                    log::trace!(
                        "virtual network {} mapped in region {} (level {})",
                        vn.id(),
                        region.id,
                        region.level
                    );
                    return Ok(Outcome::Mapped(e));
                }
                Outcome::Rejected(reason) => last = reason,
            }
        }
        Ok(Outcome::Rejected(last))
    }
}

/// The nodes a region's mapping may use.
fn region_scope(region: &Region, full_knowledge: &[NodeId]) -> Scope {
    region.nodes.iter().chain(full_knowledge).copied().collect()
}
