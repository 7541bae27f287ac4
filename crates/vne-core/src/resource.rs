//! Typed resources and demands, and the reserve/release primitives every mapping algorithm
//! builds on.

use crate::constants::EPSILON;
use crate::network::{Capacity, LinkId, NodeId, ResourceKind};

/// A request for some amount of one resource kind. Demands are immutable once a request has
/// been admitted to a trial.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct Demand {
    pub kind: ResourceKind,
    pub amount: f64,
}

/// Sums the demands of `kind` in `demands`.
pub fn demand_of(demands: &[Demand], kind: ResourceKind) -> f64 {
    demands
        .iter()
        .filter(|d| d.kind == kind)
        .map(|d| d.amount)
        .sum()
}

/// A resource attached to exactly one substrate node or link.
///
/// INVARIANT: `0 <= available <= capacity`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Resource {
    kind: ResourceKind,
    capacity: f64,
    available: f64,
}

impl Resource {
    pub fn new(kind: ResourceKind, capacity: f64) -> Self {
        Self {
            kind,
            capacity,
            available: capacity,
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn available(&self) -> f64 {
        self.available
    }

    /// The fraction of the capacity currently in use.
    pub fn utilization(&self) -> f64 {
        if self.capacity <= EPSILON {
            0.0
        } else {
            1.0 - self.available / self.capacity
        }
    }

    pub fn can_supply(&self, amount: f64) -> bool {
        amount <= self.available + EPSILON
    }

    /// Takes `amount` out of the available capacity.
    pub fn reserve(&mut self, amount: f64) -> Result<(), ResourceError> {
        if amount < 0.0 {
            return Err(ResourceError::NegativeAmount(amount));
        }
        if !self.can_supply(amount) {
            return Err(ResourceError::Insufficient {
                kind: self.kind,
                requested: amount,
                available: self.available,
            });
        }
        self.available = (self.available - amount).max(0.0);
        Ok(())
    }

    /// Gives `amount` back. Releasing more than was ever reserved is an invariant break: the
    /// resource is left untouched and `ResourceError::OverRelease` is returned.
    pub fn release(&mut self, amount: f64) -> Result<(), ResourceError> {
        self.check_release(amount)?;
        self.available = (self.available + amount).min(self.capacity);
        Ok(())
    }

    /// Checks that `amount` could be released without touching the resource.
    pub fn check_release(&self, amount: f64) -> Result<(), ResourceError> {
        if amount < 0.0 {
            return Err(ResourceError::NegativeAmount(amount));
        }
        if self.available + amount > self.capacity + EPSILON {
            return Err(ResourceError::OverRelease {
                kind: self.kind,
                released: amount,
                available: self.available,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

/// The ordered set of resources of one substrate entity.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Resources {
    inner: Vec<Resource>,
}

impl Resources {
    /// Builds a resource set from declared capacities. Capacities of the same kind are merged.
    pub fn from_capacities(capacities: &[Capacity]) -> Result<Self, ResourceError> {
        let mut inner: Vec<Resource> = Vec::new();
        for &Capacity { kind, amount } in capacities {
            if !(amount >= 0.0 && amount.is_finite()) {
                return Err(ResourceError::InvalidCapacity { kind, amount });
            }
            match inner.iter_mut().find(|r| r.kind == kind) {
                Some(r) => {
                    r.capacity += amount;
                    r.available += amount;
                }
                None => inner.push(Resource::new(kind, amount)),
            }
        }
        Ok(Self { inner })
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&Resource> {
        self.inner.iter().find(|r| r.kind == kind)
    }

    /// Available amount of `kind`; zero when the entity does not carry that resource.
    pub fn available(&self, kind: ResourceKind) -> f64 {
        self.get(kind).map(Resource::available).unwrap_or(0.0)
    }

    pub fn capacity(&self, kind: ResourceKind) -> f64 {
        self.get(kind).map(Resource::capacity).unwrap_or(0.0)
    }

    /// Returns true if every demand can be met at once.
    pub fn can_supply(&self, demands: &[Demand]) -> bool {
        demands.iter().all(|d| {
            d.amount <= EPSILON || self.get(d.kind).is_some_and(|r| r.can_supply(d.amount))
        })
    }

    pub fn reserve(&mut self, kind: ResourceKind, amount: f64) -> Result<(), ResourceError> {
        if amount <= EPSILON {
            return Ok(());
        }
        self.get_mut(kind)
            .ok_or(ResourceError::Missing(kind))?
            .reserve(amount)
    }

    pub fn release(&mut self, kind: ResourceKind, amount: f64) -> Result<(), ResourceError> {
        if amount <= EPSILON {
            return Ok(());
        }
        self.get_mut(kind)
            .ok_or(ResourceError::Missing(kind))?
            .release(amount)
    }

    pub fn check_release(&self, kind: ResourceKind, amount: f64) -> Result<(), ResourceError> {
        if amount <= EPSILON {
            return Ok(());
        }
        self.get(kind)
            .ok_or(ResourceError::Missing(kind))?
            .check_release(amount)
    }

    fn get_mut(&mut self, kind: ResourceKind) -> Option<&mut Resource> {
        self.inner.iter_mut().find(|r| r.kind == kind)
    }

    delegate::delegate! {
        to self.inner {
            #[call(iter)]
            pub fn iter(&self) -> impl Iterator<Item = &Resource>;
        }
    }
}

/// The substrate entity a reservation was made on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub enum Target {
    Node(NodeId),
    Link(LinkId),
}

/// One journaled reservation.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Reservation {
    pub target: Target,
    pub kind: ResourceKind,
    pub amount: f64,
}

/// Resource bookkeeping errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceError {
    /// Not enough capacity left to satisfy a reservation.
    #[error("insufficient {kind}: requested {requested}, available {available}")]
    Insufficient {
        kind: ResourceKind,
        requested: f64,
        available: f64,
    },

    /// A release would push the available amount above the capacity.
    #[error("releasing {released} {kind} exceeds capacity {capacity} (available {available})")]
    OverRelease {
        kind: ResourceKind,
        released: f64,
        available: f64,
        capacity: f64,
    },

    /// The entity does not carry a resource of this kind.
    #[error("no {0} resource on this entity")]
    Missing(ResourceKind),

    /// Amounts must be non-negative.
    #[error("negative amount {0}")]
    NegativeAmount(f64),

    /// A declared capacity is negative or not finite.
    #[error("invalid {kind} capacity {amount}")]
    InvalidCapacity { kind: ResourceKind, amount: f64 },

    /// The target does not exist in the substrate.
    #[error("unknown target {0:?}")]
    UnknownTarget(Target),
}

impl ResourceError {
    /// Returns true if the error only says that capacity ran out, as opposed to a broken
    /// bookkeeping invariant.
    pub fn is_shortage(&self) -> bool {
        matches!(
            self,
            ResourceError::Insufficient { .. } | ResourceError::Missing(_)
        )
    }
}
