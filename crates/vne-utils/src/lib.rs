//! Utilities for running embedding experiments from files.

#![warn(unreachable_pub, missing_debug_implementations, missing_docs)]

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use vne_core::experiment::{Experiment, TrialReport};
use vne_core::scenario::{Scenario, ScenarioError, ValidScenario};
use vne_core::solver::LpSolver;
use vne_solvers::GoodLpSolver;

/// Reads a [`Scenario`] from a file in JSON or Dhall format and validates it.
pub fn read_scenario(path: impl AsRef<Path>) -> Result<ValidScenario, Error> {
    let scenario = load_scenario(path)?;
    Ok(scenario.validate()?)
}

/// Reads an unvalidated [`Scenario`] from a file in JSON or Dhall format.
pub fn load_scenario(path: impl AsRef<Path>) -> Result<Scenario, Error> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let scenario: Scenario = match path.as_ref().extension().and_then(|ext| ext.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        Some("dhall") => serde_dhall::from_str(&contents).parse().map_err(Box::new)?,
        _ => return Err(Error::UnknownFileType(path.as_ref().into())),
    };
    Ok(scenario)
}

/// Writes trial reports to `path` as pretty-printed JSON.
pub fn write_reports(path: impl AsRef<Path>, reports: &[TrialReport]) -> Result<(), Error> {
    let f = File::create(path.as_ref())?;
    serde_json::to_writer_pretty(BufWriter::new(f), reports)?;
    Ok(())
}

/// Where the reports of the scenario at `path` are written: `<stem>.results.json` in the same
/// directory.
pub fn results_path(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}.results.json"))
}

/// Loads the scenario at `path`, runs every trial with the default solver, writes the reports
/// beside the scenario and returns them.
pub fn execute(path: impl AsRef<Path>) -> Result<Vec<TrialReport>, Error> {
    execute_with(path, &Experiment::default(), &GoodLpSolver::default())
}

/// Like [`execute`], with an explicit schedule and solver.
pub fn execute_with(
    path: impl AsRef<Path>,
    experiment: &Experiment,
    solver: &dyn LpSolver,
) -> Result<Vec<TrialReport>, Error> {
    let path = path.as_ref();
    let scenario = read_scenario(path)?;
    log::info!("loaded {}", path.display());
    let reports = experiment.run(&scenario, solver);
    let out = results_path(path);
    write_reports(&out, &reports)?;
    log::info!("wrote {} report(s) to {}", reports.len(), out.display());
    Ok(reports)
}

/// Error kinds for scenario files and I/O.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unknown file type.
    #[error("unknown file type: {0}")]
    UnknownFileType(PathBuf),

    /// Error serializing/deserializing Dhall.
    #[error("Dhall error")]
    Dhall(#[from] Box<serde_dhall::Error>),

    /// Error serializing/deserializing JSON.
    #[error("JSON error")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error")]
    Io(#[from] std::io::Error),

    /// The scenario is invalid.
    #[error("invalid scenario")]
    Scenario(#[from] ScenarioError),
}
