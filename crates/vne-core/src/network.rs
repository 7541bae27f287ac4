//! Substrate and virtual networks, and the [`NetworkStack`] that bundles one substrate with the
//! requests waiting to be embedded on it.

mod substrate;
pub(crate) mod topology;
pub mod types;
mod virtual_net;

use std::collections::VecDeque;

pub use substrate::{ResidualState, SubstrateNetwork, Transaction};
pub use topology::TopologyError;
pub use types::*;
pub use virtual_net::{Status, VirtualNetwork};

use crate::embedding::Embedding;
use crate::mapping::{Outcome, RejectReason};
use crate::resource::ResourceError;

/// A virtual network together with what happened to it.
#[derive(Debug, Clone)]
pub struct Processed {
    pub network: VirtualNetwork,
    pub outcome: Outcome,
}

/// One substrate plus an ordered sequence of virtual networks awaiting embedding. Each trial owns
/// its own stack, so trials never observe each other's reservations.
#[derive(Debug, Clone)]
pub struct NetworkStack {
    substrate: SubstrateNetwork,
    pending: VecDeque<VirtualNetwork>,
    processed: Vec<Processed>,
}

impl NetworkStack {
    pub fn new(substrate: SubstrateNetwork, requests: Vec<VirtualNetwork>) -> Self {
        Self {
            substrate,
            pending: requests.into(),
            processed: Vec::new(),
        }
    }

    pub fn substrate(&self) -> &SubstrateNetwork {
        &self.substrate
    }

    pub fn substrate_mut(&mut self) -> &mut SubstrateNetwork {
        &mut self.substrate
    }

    /// Requests not yet handed out, in order.
    pub fn pending(&self) -> impl Iterator<Item = &VirtualNetwork> {
        self.pending.iter()
    }

    /// Requests already decided, in decision order.
    pub fn processed(&self) -> &[Processed] {
        &self.processed
    }

    /// Hands out the next pending request. The caller owns it until it is passed back through
    /// [`commit`](Self::commit) or [`reject`](Self::reject).
    pub fn next_virtual_network(&mut self) -> Option<VirtualNetwork> {
        let mut vn = self.pending.pop_front()?;
        vn.set_status(Status::PartiallyAttempted);
        Some(vn)
    }

    /// Records a successful embedding. Its reservations are already on the substrate.
    pub fn commit(&mut self, mut vn: VirtualNetwork, embedding: Embedding) {
        debug_assert_eq!(vn.id(), embedding.vn);
        vn.set_status(Status::Mapped);
        self.processed.push(Processed {
            network: vn,
            outcome: Outcome::Mapped(embedding),
        });
    }

    /// Records a rejection. The attempt's reservations were rolled back when its transaction was
    /// dropped, so the substrate is as it was before the attempt.
    pub fn reject(&mut self, mut vn: VirtualNetwork, reason: RejectReason) {
        vn.set_status(Status::Rejected);
        self.processed.push(Processed {
            network: vn,
            outcome: Outcome::Rejected(reason),
        });
    }

    /// Commits or rejects `vn` according to `outcome`.
    pub fn record(&mut self, vn: VirtualNetwork, outcome: Outcome) {
        match outcome {
            Outcome::Mapped(embedding) => self.commit(vn, embedding),
            Outcome::Rejected(reason) => self.reject(vn, reason),
        }
    }

    /// Releases the resources of a mapped virtual network (its departure). The network stays
    /// in the processed list, marked unmapped.
    pub fn free(&mut self, id: VnId) -> Result<Embedding, StackError> {
        let entry = self
            .processed
            .iter_mut()
            .find(|p| p.network.id() == id)
            .ok_or(StackError::UnknownNetwork(id))?;
        let Outcome::Mapped(embedding) = &entry.outcome else {
            return Err(StackError::NotMapped(id));
        };
        self.substrate.release_all(embedding.reservations())?;
        let embedding = embedding.clone();
        entry.outcome = Outcome::Rejected(RejectReason::Departed);
        entry.network.set_status(Status::Unmapped);
        Ok(embedding)
    }

    /// Frees every embedding and puts all requests back in their original order, so the same
    /// sequence can be replayed on a pristine substrate.
    pub fn restart(&mut self) -> Result<(), StackError> {
        for p in self.processed.iter().rev() {
            if let Outcome::Mapped(embedding) = &p.outcome {
                self.substrate.release_all(embedding.reservations())?;
            }
        }
        let mut requeued = self
            .processed
            .drain(..)
            .map(|p| {
                let mut vn = p.network;
                vn.set_status(Status::Unmapped);
                vn
            })
            .collect::<VecDeque<_>>();
        requeued.append(&mut self.pending);
        self.pending = requeued;
        Ok(())
    }
}

/// Network stack errors.
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("Unknown virtual network {0}")]
    UnknownNetwork(VnId),

    #[error("Virtual network {0} is not mapped")]
    NotMapped(VnId),

    #[error(transparent)]
    Resource(#[from] ResourceError),
}
