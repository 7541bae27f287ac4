//! The result of mapping one virtual network.

use std::collections::BTreeMap;

use crate::network::{LinkId, NodeId, ResourceKind, VLinkId, VNodeId, VnId};
use crate::resource::{Reservation, Target};
use crate::search::{FlowPart, Path};

/// How a virtual link is carried through the substrate.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkRoute {
    /// The whole demand follows one path.
    Path(Path),
    /// The demand is split; each substrate link carries a fraction of it.
    Flow(Vec<LinkShare>),
}

/// The fraction of a virtual link's demand carried by one substrate link.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinkShare {
    pub link: LinkId,
    pub fraction: f64,
}

impl LinkRoute {
    /// Converts flow parts into per-link fractions of `demand`, ordered by link ID.
    pub fn from_parts(parts: &[FlowPart], demand: f64) -> Self {
        if let [single] = parts {
            return LinkRoute::Path(single.path.clone());
        }
        let mut shares: BTreeMap<LinkId, f64> = BTreeMap::new();
        for part in parts {
            for &l in &part.path.links {
                *shares.entry(l).or_default() += part.amount;
            }
        }
        LinkRoute::Flow(
            shares
                .into_iter()
                .map(|(link, amount)| LinkShare {
                    link,
                    fraction: if demand > 0.0 { amount / demand } else { 0.0 },
                })
                .collect(),
        )
    }

    /// The substrate links the route uses.
    pub fn links(&self) -> Vec<LinkId> {
        match self {
            LinkRoute::Path(p) => p.links.clone(),
            LinkRoute::Flow(shares) => shares.iter().map(|s| s.link).collect(),
        }
    }
}

/// A complete embedding: a total injective node assignment and a route per virtual link, plus
/// the ledger of reservations that realized it on the substrate.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Embedding {
    pub vn: VnId,
    pub nodes: BTreeMap<VNodeId, NodeId>,
    pub links: BTreeMap<VLinkId, LinkRoute>,
    /// Objective value reported by a solver, if one was involved.
    pub objective: Option<f64>,
    reservations: Vec<Reservation>,
}

impl Embedding {
    pub(crate) fn new(
        vn: VnId,
        nodes: BTreeMap<VNodeId, NodeId>,
        links: BTreeMap<VLinkId, LinkRoute>,
        reservations: Vec<Reservation>,
    ) -> Self {
        Self {
            vn,
            nodes,
            links,
            objective: None,
            reservations,
        }
    }

    pub(crate) fn with_objective(mut self, objective: Option<f64>) -> Self {
        self.objective = objective;
        self
    }

    /// The reservations made on behalf of this embedding, oldest first.
    pub fn reservations(&self) -> &[Reservation] {
        &self.reservations
    }

    /// Total amount of `kind` reserved.
    pub fn reserved(&self, kind: ResourceKind) -> f64 {
        self.reservations
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.amount)
            .sum()
    }

    /// Embedding cost: reserved CPU plus reserved bandwidth, hidden hops included.
    pub fn cost(&self) -> f64 {
        self.reserved(ResourceKind::Cpu) + self.reserved(ResourceKind::Bandwidth)
    }

    /// Total amount reserved on `target`.
    pub fn load_on(&self, target: Target) -> f64 {
        self.reservations
            .iter()
            .filter(|r| r.target == target)
            .map(|r| r.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_part_becomes_path() {
        let path = Path::new(vec![NodeId::new(0), NodeId::new(1)], vec![LinkId::new(0)]);
        let route = LinkRoute::from_parts(
            &[FlowPart {
                path: path.clone(),
                amount: 5.0,
            }],
            5.0,
        );
        assert_eq!(route, LinkRoute::Path(path));
    }

    #[test]
    fn split_parts_become_fractions() {
        let upper = Path::new(
            vec![NodeId::new(0), NodeId::new(1), NodeId::new(3)],
            vec![LinkId::new(0), LinkId::new(2)],
        );
        let lower = Path::new(
            vec![NodeId::new(0), NodeId::new(2), NodeId::new(3)],
            vec![LinkId::new(1), LinkId::new(3)],
        );
        let parts = [
            FlowPart {
                path: upper,
                amount: 10.0,
            },
            FlowPart {
                path: lower,
                amount: 5.0,
            },
        ];
        let LinkRoute::Flow(shares) = LinkRoute::from_parts(&parts, 15.0) else {
            panic!("expected a split route");
        };
        let fractions = shares.iter().map(|s| s.fraction).collect::<Vec<_>>();
        let expected = [2.0 / 3.0, 1.0 / 3.0, 2.0 / 3.0, 1.0 / 3.0];
        assert!(fractions
            .iter()
            .zip(expected)
            .all(|(a, b)| (a - b).abs() < 1e-12));
    }
}
