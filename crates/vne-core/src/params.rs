//! Algorithm parameters: name-to-value sets as they appear in scenario files, the spaces they are
//! swept over, and their conversion into typed mapping options.

use std::collections::BTreeMap;
use std::fmt;

use itertools::Itertools;

use crate::cost::CostKind;
use crate::mapping::{
    Coordinated, CoordinatedOpts, Distributed, DistributedOpts, Greedy, GreedyOpts, MappingAlgo,
    MathProg, MathProgMode, MathProgOpts,
};
use crate::solver::LpSolver;

/// A parameter value as written in a scenario file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(x) => write!(f, "{x}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_owned())
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// One concrete assignment of parameter values.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ParamSet {
    inner: BTreeMap<String, ParamValue>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.inner.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.inner.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Display for ParamSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.iter().map(|(k, v)| format!("{k}={v}")).join(",");
        write!(f, "{{{s}}}")
    }
}

/// One swept parameter and its candidate values.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, derive_new::new)]
pub struct Dimension {
    pub name: String,
    pub values: Vec<ParamValue>,
}

/// Ordered parameter dimensions. The first declared dimension is the outermost loop.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ParamSpace {
    dimensions: Vec<Dimension>,
}

impl ParamSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a dimension. Declaring a name twice replaces its values in place.
    pub fn dimension<V: Into<ParamValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        let name = name.into();
        let values = values.into_iter().map(Into::into).collect();
        match self.dimensions.iter_mut().find(|d| d.name == name) {
            Some(d) => d.values = values,
            None => self.dimensions.push(Dimension::new(name, values)),
        }
        self
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// The cartesian product of every dimension in nested-loop order. An empty space yields one
    /// empty set; a dimension without values yields nothing.
    pub fn expand(&self) -> Vec<ParamSet> {
        if self.dimensions.is_empty() {
            return vec![ParamSet::new()];
        }
        self.dimensions
            .iter()
            .map(|d| d.values.iter().map(move |v| (d.name.clone(), v.clone())))
            .multi_cartesian_product()
            .map(|assignment| ParamSet {
                inner: assignment.into_iter().collect(),
            })
            .collect()
    }
}

/// The parameter space of the partitioned mapping, swept in the nested order bandwidth weight,
/// delegation level, full-knowledge level, partitions, minimum partition size, max level.
#[derive(Debug, Clone, PartialEq, typed_builder::TypedBuilder)]
pub struct DistributedSweep {
    #[builder(default = vec![1.0])]
    pub weights: Vec<f64>,
    #[builder(default = vec![1])]
    pub delegation_levels: Vec<usize>,
    #[builder(default = vec![0])]
    pub full_knowledge_levels: Vec<usize>,
    #[builder(default = vec![2])]
    pub partitions: Vec<usize>,
    #[builder(default = vec![2])]
    pub min_partition_sizes: Vec<usize>,
    #[builder(default = vec![1])]
    pub max_levels: Vec<usize>,
}

impl DistributedSweep {
    pub fn space(&self) -> ParamSpace {
        let ints = |xs: &[usize]| xs.iter().map(|&x| ParamValue::Int(x as i64)).collect_vec();
        ParamSpace::new()
            .dimension("omega", self.weights.iter().copied())
            .dimension("delegation_nodes_level", ints(&self.delegation_levels))
            .dimension("full_knowledge_nodes_level", ints(&self.full_knowledge_levels))
            .dimension("partitions", ints(&self.partitions))
            .dimension("min_partition_size", ints(&self.min_partition_sizes))
            .dimension("max_level", ints(&self.max_levels))
    }
}

/// The mapping algorithm family a scenario runs.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    serde::Serialize,
    serde::Deserialize,
    derive_more::Display,
)]
#[serde(rename_all = "snake_case")]
pub enum AlgoKind {
    #[default]
    #[display(fmt = "greedy")]
    Greedy,
    #[display(fmt = "coordinated")]
    Coordinated,
    #[display(fmt = "distributed")]
    Distributed,
    #[display(fmt = "math_prog")]
    MathProg,
}

/// Typed options of one mapping algorithm.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum AlgoConfig {
    Greedy(GreedyOpts),
    Coordinated(CoordinatedOpts),
    Distributed(DistributedOpts),
    MathProg(MathProgOpts),
}

impl AlgoConfig {
    /// Converts a parameter set into the options of `kind`. Parameters not set keep their
    /// defaults; unknown names and ill-typed values are errors.
    pub fn from_params(kind: AlgoKind, params: &ParamSet) -> Result<Self, ConfigError> {
        let mut p = Reader::new(kind, params);
        let config = match kind {
            AlgoKind::Greedy => {
                let d = GreedyOpts::default();
                // Options of a cost model are only recognized together with that model
                let cost = match p.text("cost")?.as_deref().unwrap_or("bandwidth_cpu") {
                    "distance" => CostKind::Distance,
                    "bandwidth" => CostKind::Bandwidth {
                        hidden_hop_factor: p.float("hidden_hop_factor")?.unwrap_or(0.0),
                    },
                    "bandwidth_cpu" => CostKind::BandwidthCpu {
                        weight_cpu: p.float("weight_cpu")?.unwrap_or(1.0),
                        weight_bw: p.float("weight_bw")?.unwrap_or(1.0),
                        hidden_hop_factor: p.float("hidden_hop_factor")?.unwrap_or(0.0),
                    },
                    other => return Err(p.invalid("cost", other)),
                };
                AlgoConfig::Greedy(GreedyOpts {
                    k: p.natural("k")?.unwrap_or(d.k),
                    max_distance: p.natural("distance")?.or(d.max_distance),
                    path_splitting: p.boolean("path_splitting")?.unwrap_or(d.path_splitting),
                    cost,
                })
            }
            AlgoKind::Coordinated => {
                let d = CoordinatedOpts::default();
                AlgoConfig::Coordinated(CoordinatedOpts {
                    weight_cpu: p.float("weight_cpu")?.unwrap_or(d.weight_cpu),
                    weight_bw: p.float("weight_bw")?.unwrap_or(d.weight_bw),
                    hidden_hop_factor: p
                        .float("hidden_hop_factor")?
                        .unwrap_or(d.hidden_hop_factor),
                    max_distance: p.natural("distance")?.or(d.max_distance),
                    k: p.natural("k")?.unwrap_or(d.k),
                    path_splitting: p.boolean("path_splitting")?.unwrap_or(d.path_splitting),
                    randomize: p.boolean("randomize")?.unwrap_or(d.randomize),
                    seed: p.natural("seed")?.map(|s| s as u64).unwrap_or(d.seed),
                    candidate_budget: p.natural("candidate_budget")?.or(d.candidate_budget),
                })
            }
            AlgoKind::Distributed => {
                let d = DistributedOpts::default();
                AlgoConfig::Distributed(DistributedOpts {
                    bandwidth_weight: p.float("omega")?.unwrap_or(d.bandwidth_weight),
                    delegation_nodes_level: p
                        .natural("delegation_nodes_level")?
                        .unwrap_or(d.delegation_nodes_level),
                    full_knowledge_nodes_level: p
                        .natural("full_knowledge_nodes_level")?
                        .unwrap_or(d.full_knowledge_nodes_level),
                    partitions: p.natural("partitions")?.unwrap_or(d.partitions),
                    min_partition_size: p
                        .natural("min_partition_size")?
                        .unwrap_or(d.min_partition_size),
                    max_level: p.natural("max_level")?.unwrap_or(d.max_level),
                })
            }
            AlgoKind::MathProg => {
                let d = MathProgOpts::default();
                let mode = match p.text("mode")?.as_deref() {
                    None | Some("exact") => MathProgMode::Exact,
                    Some("rounded") => MathProgMode::Rounded {
                        randomized: p.boolean("randomize")?.unwrap_or(false),
                        seed: p.natural("seed")?.map(|s| s as u64).unwrap_or(0),
                    },
                    Some(other) => return Err(p.invalid("mode", other)),
                };
                AlgoConfig::MathProg(MathProgOpts {
                    mode,
                    path_splitting: p.boolean("path_splitting")?.unwrap_or(d.path_splitting),
                    weight_cpu: p.float("weight_cpu")?.unwrap_or(d.weight_cpu),
                    weight_bw: p.float("weight_bw")?.unwrap_or(d.weight_bw),
                })
            }
        };
        p.finish()?;
        Ok(config)
    }

    pub fn kind(&self) -> AlgoKind {
        match self {
            AlgoConfig::Greedy(_) => AlgoKind::Greedy,
            AlgoConfig::Coordinated(_) => AlgoKind::Coordinated,
            AlgoConfig::Distributed(_) => AlgoKind::Distributed,
            AlgoConfig::MathProg(_) => AlgoKind::MathProg,
        }
    }

    /// Instantiates the algorithm. Only the mathematical programming mapping uses `solver`.
    pub fn build<'a>(&self, solver: &'a dyn LpSolver) -> Box<dyn MappingAlgo + 'a> {
        match *self {
            AlgoConfig::Greedy(opts) => Box::new(Greedy::new(opts)),
            AlgoConfig::Coordinated(opts) => Box::new(Coordinated::new(opts)),
            AlgoConfig::Distributed(opts) => Box::new(Distributed::new(opts)),
            AlgoConfig::MathProg(opts) => Box::new(MathProg::new(opts, solver)),
        }
    }
}

/// Reads typed values out of a parameter set and remembers which names were consumed.
struct Reader<'a> {
    kind: AlgoKind,
    params: &'a ParamSet,
    seen: Vec<&'static str>,
}

impl<'a> Reader<'a> {
    fn new(kind: AlgoKind, params: &'a ParamSet) -> Self {
        Self {
            kind,
            params,
            seen: Vec::new(),
        }
    }

    fn get(&mut self, name: &'static str) -> Option<&'a ParamValue> {
        self.seen.push(name);
        self.params.get(name)
    }

    fn invalid(&self, name: &str, value: impl fmt::Display) -> ConfigError {
        ConfigError::InvalidValue {
            name: name.to_owned(),
            value: value.to_string(),
        }
    }

    fn float(&mut self, name: &'static str) -> Result<Option<f64>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(&ParamValue::Float(x)) if x.is_finite() && x >= 0.0 => Ok(Some(x)),
            Some(&ParamValue::Int(i)) if i >= 0 => Ok(Some(i as f64)),
            Some(ParamValue::Text(s)) => match s.trim().parse::<f64>() {
                Ok(x) if x.is_finite() && x >= 0.0 => Ok(Some(x)),
                _ => Err(self.invalid(name, s)),
            },
            Some(v) => Err(self.invalid(name, v)),
        }
    }

    fn natural(&mut self, name: &'static str) -> Result<Option<usize>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(&ParamValue::Int(i)) if i >= 0 => Ok(Some(i as usize)),
            Some(ParamValue::Text(s)) => s
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| self.invalid(name, s)),
            Some(v) => Err(self.invalid(name, v)),
        }
    }

    fn boolean(&mut self, name: &'static str) -> Result<Option<bool>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(&ParamValue::Bool(b)) => Ok(Some(b)),
            Some(ParamValue::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Ok(Some(true)),
                "false" | "no" => Ok(Some(false)),
                _ => Err(self.invalid(name, s)),
            },
            Some(v) => Err(self.invalid(name, v)),
        }
    }

    fn text(&mut self, name: &'static str) -> Result<Option<String>, ConfigError> {
        match self.get(name) {
            None => Ok(None),
            Some(ParamValue::Text(s)) => Ok(Some(s.trim().to_ascii_lowercase())),
            Some(v) => Err(self.invalid(name, v)),
        }
    }

    fn finish(self) -> Result<(), ConfigError> {
        for (name, _) in self.params.iter() {
            if !self.seen.contains(&name) {
                return Err(ConfigError::UnknownOption {
                    algorithm: self.kind,
                    name: name.to_owned(),
                });
            }
        }
        Ok(())
    }
}

/// Errors converting parameter sets into algorithm options.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The algorithm has no option of this name.
    #[error("{algorithm} has no option named `{name}`")]
    UnknownOption { algorithm: AlgoKind, name: String },

    /// The value cannot be converted into the option's type.
    #[error("invalid value `{value}` for option `{name}`")]
    InvalidValue { name: String, value: String },
}
