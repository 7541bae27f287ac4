//! This module defines scenarios ([`Scenario`]): a substrate, an ordered sequence of virtual
//! network requests, and the algorithm parameters to sweep over them.

use std::collections::HashSet;

use crate::network::{
    Link, NetworkStack, Node, SubstrateNetwork, TopologyError, VLink, VNode, VirtualNetwork, VnId,
};
use crate::params::{AlgoKind, ParamSpace};

/// A virtual network request as declared in a scenario.
#[derive(
    Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, typed_builder::TypedBuilder,
)]
pub struct Request {
    pub id: VnId,
    pub nodes: Vec<VNode>,
    #[serde(default)]
    #[builder(default)]
    pub links: Vec<VLink>,
}

/// An experiment scenario.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, typed_builder::TypedBuilder)]
pub struct Scenario {
    /// Substrate nodes.
    pub nodes: Vec<Node>,
    /// Substrate links.
    pub links: Vec<Link>,
    /// Virtual network requests, in arrival order.
    pub requests: Vec<Request>,
    /// Mapping algorithm family.
    #[serde(default)]
    #[builder(default)]
    pub algorithm: AlgoKind,
    /// Parameter ranges swept by the experiment.
    #[serde(default)]
    #[builder(default)]
    pub params: ParamSpace,
}

impl Scenario {
    /// Validate a scenario, producing a `ValidScenario`.
    ///
    /// Correctness properties:
    ///
    /// - The substrate satisfies the properties listed in `SubstrateNetwork::new()`
    /// - Every request satisfies the properties listed in `VirtualNetwork::new()`
    /// - Request IDs are unique
    pub fn validate(self) -> Result<ValidScenario, ScenarioError> {
        let substrate = SubstrateNetwork::new(&self.nodes, &self.links)
            .map_err(ScenarioError::InvalidSubstrate)?;
        let mut ids = HashSet::new();
        let mut requests = Vec::with_capacity(self.requests.len());
        for Request { id, nodes, links } in self.requests {
            // CORRECTNESS: Request IDs must be unique.
            if !ids.insert(id) {
                return Err(ScenarioError::DuplicateRequest(id));
            }
            let vn = VirtualNetwork::new(id, nodes, links)
                .map_err(|source| ScenarioError::InvalidRequest { id, source })?;
            requests.push(vn);
        }
        Ok(ValidScenario {
            substrate,
            requests,
            algorithm: self.algorithm,
            params: self.params,
        })
    }
}

/// A `ValidScenario` is a `Scenario` that has been validated. The substrate and the requests are
/// guaranteed to satisfy the properties listed in `Scenario::validate()`.
#[derive(Debug, Clone)]
pub struct ValidScenario {
    substrate: SubstrateNetwork,
    requests: Vec<VirtualNetwork>,
    algorithm: AlgoKind,
    params: ParamSpace,
}

impl ValidScenario {
    /// A fresh network stack over a copy of the substrate, with every request pending.
    pub fn stack(&self) -> NetworkStack {
        NetworkStack::new(self.substrate.clone(), self.requests.clone())
    }

    pub fn substrate(&self) -> &SubstrateNetwork {
        &self.substrate
    }

    pub fn requests(&self) -> &[VirtualNetwork] {
        &self.requests
    }

    pub fn algorithm(&self) -> AlgoKind {
        self.algorithm
    }

    pub fn params(&self) -> &ParamSpace {
        &self.params
    }
}

/// Scenario validation error.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// The substrate is invalid.
    #[error("invalid substrate")]
    InvalidSubstrate(#[source] TopologyError),

    /// A request is invalid.
    #[error("invalid virtual network request {id}")]
    InvalidRequest {
        id: VnId,
        #[source]
        source: TopologyError,
    },

    /// Two requests share an ID.
    #[error("duplicate virtual network request {0}")]
    DuplicateRequest(VnId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{NodeId, VNodeId};
    use crate::testing;

    fn scenario() -> Scenario {
        testing::pair_scenario(1, 5.0)
    }

    #[test]
    fn valid_scenario_succeeds() -> anyhow::Result<()> {
        let valid = scenario().validate()?;
        let stack = valid.stack();
        assert_eq!(stack.pending().count(), 1);
        assert_eq!(valid.algorithm(), AlgoKind::Greedy);
        Ok(())
    }

    #[test]
    fn stacks_are_independent() -> anyhow::Result<()> {
        let valid = scenario().validate()?;
        let mut first = valid.stack();
        let greedy = crate::mapping::Greedy::new(Default::default());
        crate::mapping::run(&mut first, &greedy)?;
        let second = valid.stack();
        let pristine = valid.substrate().residual_state();
        assert_eq!(second.substrate().residual_state(), pristine);
        assert_ne!(first.substrate().residual_state(), pristine);
        Ok(())
    }

    #[test]
    fn duplicate_request_fails() {
        let mut scenario = scenario();
        let first = scenario.requests[0].clone();
        scenario.requests.push(first);
        assert!(matches!(
            scenario.validate(),
            Err(ScenarioError::DuplicateRequest(..))
        ));
    }

    #[test]
    fn dangling_request_link_fails() {
        let mut scenario = scenario();
        scenario.requests[0].links[0].b = VNodeId::new(7);
        assert!(matches!(
            scenario.validate(),
            Err(ScenarioError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn invalid_substrate_fails() {
        let mut scenario = scenario();
        scenario.links[0].a = NodeId::new(9);
        assert!(matches!(
            scenario.validate(),
            Err(ScenarioError::InvalidSubstrate(..))
        ));
    }

    #[test]
    fn scenario_reads_from_json() -> anyhow::Result<()> {
        let json = r#"{
            "nodes": [
                {"id": 0, "capacities": [{"kind": "cpu", "amount": 10}]},
                {"id": 1, "capacities": [{"kind": "cpu", "amount": 10}]}
            ],
            "links": [
                {"id": 0, "a": 0, "b": 1, "capacities": [{"kind": "bandwidth", "amount": 10}]}
            ],
            "requests": [{
                "id": 0,
                "nodes": [{"id": 0, "demands": [{"kind": "cpu", "amount": 4}]}]
            }],
            "algorithm": "coordinated",
            "params": [{"name": "k", "values": [1, 2]}]
        }"#;
        let scenario: Scenario = serde_json::from_str(json)?;
        let valid = scenario.validate()?;
        assert_eq!(valid.algorithm(), AlgoKind::Coordinated);
        assert_eq!(valid.params().expand().len(), 2);
        Ok(())
    }
}
