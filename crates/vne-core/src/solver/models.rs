//! Embedding models. Node assignment variables are `x[v,s]` (integral) or `lambda[v,s]` (relaxed);
//! `flow[l,i,j]` is the fraction of virtual link `l`'s demand sent from substrate node `i` to its
//! neighbor `j`.

use std::collections::BTreeMap;

use crate::constants::{EPSILON, SOLVER_DELTA};
use crate::network::{NodeId, ResourceKind, SubstrateNetwork, VNodeId, VirtualNetwork};
use crate::solver::{LpModel, Relation, VarName};

/// Objective weights of the embedding models.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct ModelWeights {
    pub weight_cpu: f64,
    pub weight_bw: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self::new(1.0, 1.0)
    }
}

impl LpModel {
    /// The joint node and link mapping MIP: binary `x[v,s]` and `flow[l,i,j]` (continuous when
    /// `path_splitting`).
    pub fn exact(
        substrate: &SubstrateNetwork,
        vn: &VirtualNetwork,
        weights: ModelWeights,
        path_splitting: bool,
    ) -> Self {
        let mut b = Builder::new(format!("exact vn {}", vn.id()), substrate, vn, weights);
        b.node_vars("x", true);
        b.flow_vars(!path_splitting, path_splitting);
        b.conservation(Endpoints::Variable);
        b.finish()
    }

    /// The relaxed node mapping LP: `lambda[v,s]` in `[0, 1]` and fractional flows.
    pub fn node_mapping(
        substrate: &SubstrateNetwork,
        vn: &VirtualNetwork,
        weights: ModelWeights,
    ) -> Self {
        let mut b = Builder::new(
            format!("node_mapping vn {}", vn.id()),
            substrate,
            vn,
            weights,
        );
        b.node_vars("lambda", false);
        b.flow_vars(false, true);
        b.conservation(Endpoints::Variable);
        b.finish()
    }

    /// The link mapping multi-commodity flow problem for a fixed node assignment. Flows are binary
    /// unless `path_splitting`.
    pub fn link_mapping(
        substrate: &SubstrateNetwork,
        vn: &VirtualNetwork,
        nodes: &BTreeMap<VNodeId, NodeId>,
        weights: ModelWeights,
        path_splitting: bool,
    ) -> Self {
        let mut b = Builder::new(
            format!("link_mapping vn {}", vn.id()),
            substrate,
            vn,
            weights,
        );
        b.flow_vars(!path_splitting, path_splitting);
        b.conservation(Endpoints::Fixed(nodes));
        b.finish()
    }
}

enum Endpoints<'a> {
    /// Endpoints are chosen by the node assignment variables.
    Variable,
    Fixed(&'a BTreeMap<VNodeId, NodeId>),
}

struct Builder<'a> {
    model: LpModel,
    substrate: &'a SubstrateNetwork,
    vn: &'a VirtualNetwork,
    weights: ModelWeights,
    objective: Vec<(usize, f64)>,
    // (virtual node, substrate node) -> variable index
    node_vars: BTreeMap<(VNodeId, NodeId), usize>,
    // (virtual link, from, to) -> variable index, in link order
    flow_vars: Vec<((usize, NodeId, NodeId), usize)>,
}

impl<'a> Builder<'a> {
    fn new(
        name: String,
        substrate: &'a SubstrateNetwork,
        vn: &'a VirtualNetwork,
        weights: ModelWeights,
    ) -> Self {
        Self {
            model: LpModel::new(name),
            substrate,
            vn,
            weights,
            objective: Vec::new(),
            node_vars: BTreeMap::new(),
            flow_vars: Vec::new(),
        }
    }

    /// Assignment variables for every (virtual node, substrate node that can host it), with the
    /// assignment, injectivity and node capacity constraints.
    fn node_vars(&mut self, prefix: &str, integer: bool) {
        for v in self.vn.nodes() {
            let mut terms = Vec::new();
            for s in self.substrate.nodes() {
                if !s.resources.can_supply(&v.demands) {
                    continue;
                }
                let name = VarName::new(prefix, [v.id.inner(), s.id.inner()]);
                let idx = self.model.add_var(name, 0.0, Some(1.0), integer);
                let residual = s.resources.available(ResourceKind::Cpu).max(SOLVER_DELTA);
                let coef = self.weights.weight_cpu * v.demand(ResourceKind::Cpu) / residual;
                if coef != 0.0 {
                    self.objective.push((idx, coef));
                }
                self.node_vars.insert((v.id, s.id), idx);
                terms.push((idx, 1.0));
            }
            self.model
                .add_constraint(format!("assign[{}]", v.id), terms, Relation::Eq, 1.0);
        }
        for s in self.substrate.nodes() {
            let hosted = self
                .node_vars
                .iter()
                .filter(|((_, host), _)| *host == s.id)
                .map(|((v, _), &idx)| (*v, idx))
                .collect::<Vec<_>>();
            if hosted.len() > 1 {
                let terms = hosted.iter().map(|&(_, idx)| (idx, 1.0)).collect();
                self.model
                    .add_constraint(format!("injective[{}]", s.id), terms, Relation::Le, 1.0);
            }
            for r in s.resources.iter() {
                let terms = hosted
                    .iter()
                    .filter_map(|&(v, idx)| {
                        let d = self.vn.node(v)?.demand(r.kind());
                        (d > EPSILON).then_some((idx, d))
                    })
                    .collect::<Vec<_>>();
                if !terms.is_empty() {
                    self.model.add_constraint(
                        format!("{}[{}]", r.kind(), s.id),
                        terms,
                        Relation::Le,
                        r.available(),
                    );
                }
            }
        }
    }

    /// Flow variables in both directions of every substrate link that can carry the virtual link,
    /// with the link capacity constraints.
    fn flow_vars(&mut self, integer: bool, partial: bool) {
        let mut per_link: BTreeMap<usize, Vec<(usize, f64)>> = BTreeMap::new();
        for vl in self.vn.links() {
            let demand = vl.bandwidth();
            for e in self.substrate.links() {
                let available = e.resources.available(ResourceKind::Bandwidth);
                let usable = match partial {
                    true => available > EPSILON || demand <= EPSILON,
                    false => available + EPSILON >= demand,
                };
                if !usable {
                    continue;
                }
                let coef = self.weights.weight_bw * demand / available.max(SOLVER_DELTA);
                for (i, j) in [(e.a, e.b), (e.b, e.a)] {
                    let name = VarName::new("flow", [vl.id.inner(), i.inner(), j.inner()]);
                    let idx = self.model.add_var(name, 0.0, Some(1.0), integer);
                    if coef != 0.0 {
                        self.objective.push((idx, coef));
                    }
                    self.flow_vars.push(((vl.id.inner(), i, j), idx));
                    if demand > EPSILON {
                        per_link.entry(e.id.inner()).or_default().push((idx, demand));
                    }
                }
            }
        }
        for (link, terms) in per_link {
            let available = self
                .substrate
                .link_available(crate::network::LinkId::new(link), ResourceKind::Bandwidth);
            self.model
                .add_constraint(format!("bw[{link}]"), terms, Relation::Le, available);
        }
    }

    /// Flow conservation for every virtual link at every substrate node: outflow minus inflow
    /// equals one at the source, minus one at the destination, and zero elsewhere.
    fn conservation(&mut self, endpoints: Endpoints<'_>) {
        for vl in self.vn.links() {
            for s in self.substrate.nodes() {
                let mut terms = self
                    .flow_vars
                    .iter()
                    .filter(|((l, _, _), _)| *l == vl.id.inner())
                    .filter_map(|&((_, i, j), idx)| match (i == s.id, j == s.id) {
                        (true, _) => Some((idx, 1.0)),
                        (_, true) => Some((idx, -1.0)),
                        _ => None,
                    })
                    .collect::<Vec<_>>();
                let rhs = match endpoints {
                    Endpoints::Variable => {
                        if let Some(&idx) = self.node_vars.get(&(vl.a, s.id)) {
                            terms.push((idx, -1.0));
                        }
                        if let Some(&idx) = self.node_vars.get(&(vl.b, s.id)) {
                            terms.push((idx, 1.0));
                        }
                        0.0
                    }
                    Endpoints::Fixed(nodes) => {
                        let src = nodes.get(&vl.a) == Some(&s.id);
                        let dst = nodes.get(&vl.b) == Some(&s.id);
                        match (src, dst) {
                            (true, false) => 1.0,
                            (false, true) => -1.0,
                            _ => 0.0,
                        }
                    }
                };
                if terms.is_empty() && rhs == 0.0 {
                    continue;
                }
                self.model.add_constraint(
                    format!("flow_conservation[{},{}]", vl.id, s.id),
                    terms,
                    Relation::Eq,
                    rhs,
                );
            }
        }
    }

    fn finish(mut self) -> LpModel {
        self.model.set_objective(self.objective);
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::VnId;
    use crate::testing;

    #[test]
    fn link_mapping_model_text() {
        let substrate = testing::two_node_substrate();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let nodes = [(0, 0), (1, 1)]
            .into_iter()
            .map(|(v, s)| (VNodeId::new(v), NodeId::new(s)))
            .collect();
        let model =
            LpModel::link_mapping(&substrate, &vn, &nodes, ModelWeights::default(), false);
        insta::assert_snapshot!(model.to_lp_string(), @r###"
        \ link_mapping vn 0
        Minimize
         obj: 0.5 flow[0,0,1] + 0.5 flow[0,1,0]
        Subject To
         bw[0]: 5 flow[0,0,1] + 5 flow[0,1,0] <= 10
         flow_conservation[0,0]: flow[0,0,1] - flow[0,1,0] = 1
         flow_conservation[0,1]: - flow[0,0,1] + flow[0,1,0] = -1
        Binary
         flow[0,0,1]
         flow[0,1,0]
        End
        "###);
    }

    #[test]
    fn exact_model_has_assignment_rows() {
        let substrate = testing::two_node_substrate();
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let model = LpModel::exact(&substrate, &vn, ModelWeights::default(), false);
        let names = model
            .constraints()
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "assign[0]",
                "assign[1]",
                "injective[0]",
                "cpu[0]",
                "injective[1]",
                "cpu[1]",
                "bw[0]",
                "flow_conservation[0,0]",
                "flow_conservation[0,1]",
            ]
        );
        // Four assignment variables and two flow directions
        assert_eq!(model.variables().len(), 6);
        assert!(model.variables().iter().all(|v| v.integer));
    }

    #[test]
    fn hosts_without_capacity_get_no_variable() {
        let substrate = testing::line_substrate_with(&[10.0, 1.0], 10.0);
        let vn = testing::pair_request(VnId::ZERO, 4.0, 5.0);
        let model = LpModel::node_mapping(&substrate, &vn, ModelWeights::default());
        assert!(model.var_index("lambda[0,0]").is_some());
        assert!(model.var_index("lambda[0,1]").is_none());
        assert!(model.variables().iter().all(|v| !v.integer));
    }
}
