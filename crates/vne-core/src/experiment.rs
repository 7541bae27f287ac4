//! The experiment orchestrator. Every parameter set of a scenario's space becomes one trial; trials
//! run in parallel, each on its own copy of the network stack.

use rayon::prelude::*;

use crate::mapping::{self, MappingError, Outcome, RejectReason};
use crate::network::{NetworkStack, ResourceKind, VnId};
use crate::params::{AlgoConfig, AlgoKind, ConfigError, ParamSet};
use crate::scenario::ValidScenario;
use crate::solver::LpSolver;

identifier!(TrialId, usize);

/// How trials are scheduled.
#[derive(Debug, Clone, Copy, typed_builder::TypedBuilder)]
pub struct Experiment {
    /// Run trials on the rayon thread pool.
    #[builder(default = true)]
    parallel: bool,
}

impl Default for Experiment {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Experiment {
    /// The trials of `scenario`, in parameter expansion order.
    pub fn trials(scenario: &ValidScenario) -> Vec<(TrialId, ParamSet)> {
        scenario
            .params()
            .expand()
            .into_iter()
            .enumerate()
            .map(|(i, params)| (TrialId::new(i), params))
            .collect()
    }

    /// Runs every trial of `scenario` and returns the reports ordered by trial ID. A trial that
    /// fails does not stop the others.
    pub fn run(&self, scenario: &ValidScenario, solver: &dyn LpSolver) -> Vec<TrialReport> {
        let trials = Self::trials(scenario);
        log::info!(
            "running {} trial(s) of {} over {} request(s)",
            trials.len(),
            scenario.algorithm(),
            scenario.requests().len()
        );
        let mut reports = if self.parallel {
            let (s, r) = crossbeam_channel::unbounded();
            trials.par_iter().for_each_with(s, |s, (id, params)| {
                let report = run_trial(scenario, *id, params, solver);
                // The receiver outlives every sender
                if let Err(e) = s.send(report) {
                    log::error!("lost the report of trial {id}: {e}");
                }
            });
            r.iter().collect::<Vec<_>>()
        } else {
            trials
                .iter()
                .map(|(id, params)| run_trial(scenario, *id, params, solver))
                .collect()
        };
        reports.sort_by_key(|r| r.id);
        reports
    }
}

fn run_trial(
    scenario: &ValidScenario,
    id: TrialId,
    params: &ParamSet,
    solver: &dyn LpSolver,
) -> TrialReport {
    let algorithm = scenario.algorithm();
    log::info!("trial {id}: {algorithm} {params}");
    let outcome = match try_trial(scenario, params, solver) {
        Ok(metrics) => {
            log::info!(
                "trial {id}: accepted {}/{}",
                metrics.accepted,
                metrics.requests.len()
            );
            TrialOutcome::Completed(metrics)
        }
        Err(TrialFailure { error, requests }) => {
            log::error!(
                "trial {id} failed after {} request(s): {error}",
                requests.len()
            );
            TrialOutcome::Failed {
                error: error.to_string(),
                requests,
            }
        }
    };
    TrialReport {
        id,
        algorithm,
        params: params.clone(),
        outcome,
    }
}

/// A failed trial with the outcomes decided before the failure.
struct TrialFailure {
    error: ExperimentError,
    requests: Vec<RequestReport>,
}

fn try_trial(
    scenario: &ValidScenario,
    params: &ParamSet,
    solver: &dyn LpSolver,
) -> Result<TrialMetrics, TrialFailure> {
    let config =
        AlgoConfig::from_params(scenario.algorithm(), params).map_err(|e| TrialFailure {
            error: e.into(),
            requests: Vec::new(),
        })?;
    let algo = config.build(solver);
    let mut stack = scenario.stack();
    if let Err(e) = mapping::run(&mut stack, &*algo) {
        return Err(TrialFailure {
            error: e.into(),
            requests: RequestReport::from_stack(&stack),
        });
    }
    Ok(TrialMetrics::from_stack(&stack))
}

/// The record of one trial.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrialReport {
    pub id: TrialId,
    pub algorithm: AlgoKind,
    pub params: ParamSet,
    pub outcome: TrialOutcome,
}

/// Whether a trial ran to completion.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    Completed(TrialMetrics),
    /// An infrastructure failure: an invalid configuration or a solver error. `requests` holds
    /// the outcomes decided before it, the failing request last.
    Failed {
        error: String,
        #[serde(default)]
        requests: Vec<RequestReport>,
    },
}

impl TrialOutcome {
    pub fn metrics(&self) -> Option<&TrialMetrics> {
        match self {
            TrialOutcome::Completed(m) => Some(m),
            TrialOutcome::Failed { .. } => None,
        }
    }
}

/// What happened to one request.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RequestReport {
    pub vn: VnId,
    pub outcome: RequestOutcome,
}

impl RequestReport {
    /// Reports of every processed request of `stack`, in processing order.
    pub fn from_stack(stack: &NetworkStack) -> Vec<Self> {
        stack
            .processed()
            .iter()
            .map(|p| RequestReport {
                vn: p.network.id(),
                outcome: match &p.outcome {
                    Outcome::Mapped(e) => RequestOutcome::Mapped { cost: e.cost() },
                    Outcome::Rejected(reason) => RequestOutcome::Rejected { reason: *reason },
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestOutcome {
    Mapped { cost: f64 },
    Rejected { reason: RejectReason },
}

/// Metrics of a completed trial.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrialMetrics {
    /// Per-request outcomes in processing order.
    pub requests: Vec<RequestReport>,
    pub accepted: usize,
    pub rejected: usize,
    pub acceptance_ratio: f64,
    /// Mean CPU utilization over substrate nodes.
    pub node_utilization: f64,
    /// Mean bandwidth utilization over substrate links.
    pub link_utilization: f64,
    /// Reserved CPU plus reserved bandwidth over all embeddings.
    pub cost: f64,
    /// Sum of the solver objectives, if a solver was involved.
    pub objective: Option<f64>,
}

impl TrialMetrics {
    pub fn from_stack(stack: &NetworkStack) -> Self {
        let requests = RequestReport::from_stack(stack);
        let embeddings = stack
            .processed()
            .iter()
            .filter_map(|p| p.outcome.embedding())
            .collect::<Vec<_>>();
        let accepted = embeddings.len();
        let rejected = requests.len() - accepted;
        let acceptance_ratio = match requests.len() {
            0 => 0.0,
            n => accepted as f64 / n as f64,
        };
        let objective = embeddings
            .iter()
            .filter_map(|e| e.objective)
            .fold(None, |acc: Option<f64>, x| Some(acc.unwrap_or(0.0) + x));
        Self {
            accepted,
            rejected,
            acceptance_ratio,
            node_utilization: stack.substrate().utilization(ResourceKind::Cpu),
            link_utilization: stack.substrate().utilization(ResourceKind::Bandwidth),
            cost: embeddings.iter().map(|e| e.cost()).sum(),
            objective,
            requests,
        }
    }
}

/// Errors that fail a trial.
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("mapping failed: {0}")]
    Mapping(#[from] MappingError),
}
