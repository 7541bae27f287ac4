use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use indicatif::ProgressBar;
use vne_core::experiment::{Experiment, TrialOutcome};
use vne_solvers::{GoodLpSolver, SolverOpts};

/// Runs embedding experiments headlessly. Results of `<name>.json` are written to
/// `<name>.results.json`.
#[derive(Parser, Debug)]
struct Args {
    /// Scenario files (JSON or Dhall)
    #[arg(required = true)]
    scenarios: Vec<PathBuf>,
    /// Solver time limit per solve, in seconds
    #[arg(short, long, default_value_t = 60)]
    timeout: u64,
    /// Run the trials of a scenario one after another
    #[arg(short, long)]
    sequential: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let solver = GoodLpSolver::new(
        SolverOpts::builder()
            .timeout(Some(Duration::from_secs(args.timeout)))
            .build(),
    );
    let experiment = Experiment::builder().parallel(!args.sequential).build();

    let bar = ProgressBar::new(args.scenarios.len() as u64);
    let mut failed = 0;
    for path in &args.scenarios {
        bar.set_message(path.display().to_string());
        match vne_utils::execute_with(path, &experiment, &solver) {
            Ok(reports) => {
                for r in &reports {
                    match &r.outcome {
                        TrialOutcome::Completed(m) => bar.println(format!(
                            "{} trial {} {}: accepted {}/{} (cost {:.2})",
                            path.display(),
                            r.id,
                            r.params,
                            m.accepted,
                            m.requests.len(),
                            m.cost
                        )),
                        TrialOutcome::Failed { error, requests } => bar.println(format!(
                            "{} trial {} {}: failed after {} request(s): {error}",
                            path.display(),
                            r.id,
                            r.params,
                            requests.len()
                        )),
                    }
                }
            }
            Err(e) => {
                log::error!("{}: {}", path.display(), chain(&e));
                failed += 1;
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
    if failed > 0 {
        anyhow::bail!("{failed} of {} scenario(s) failed", args.scenarios.len());
    }
    Ok(())
}

/// An error followed by its sources.
fn chain(e: &dyn Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}
