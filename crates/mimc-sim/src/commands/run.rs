use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use mimc_engine::{MimcRun, MimcRunBuilder, RunSummary};
use serde::Serialize;
use tracing::info;

use crate::sim_config::SimConfig;
use crate::write_json;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML file with `run`, `problem` and `seed` sections.
    #[arg(long)]
    pub config: PathBuf,
    /// Overrides the configured tolerance.
    #[arg(long)]
    pub tol: Option<f64>,
    /// Overrides the configured seed.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Output file for the JSON report; printed to stdout when absent.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Outcome of a demo run together with the problem's known limit.
#[derive(Debug, Serialize)]
pub struct SimReport {
    pub problem: String,
    pub seed: u64,
    pub exact: f64,
    pub error: Option<f64>,
    pub summary: RunSummary<f64>,
}

pub fn execute(args: &RunArgs) -> Result<SimReport, Box<dyn Error>> {
    let mut config = SimConfig::load(&args.config)?;
    if let Some(tol) = args.tol {
        config.run.tol = tol;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    let config = config.prepared()?;
    let sampler = config.problem.sampler(config.seed)?;
    let mut run: MimcRun = MimcRunBuilder::new(config.run.clone())
        .level_sampler(sampler)
        .build()?;
    info!(problem = config.problem.name(), seed = config.seed, tol = config.run.tol, "running demo problem");
    let summary = run.run()?;
    let exact = config.problem.exact();
    Ok(SimReport {
        problem: config.problem.name().to_string(),
        seed: config.seed,
        exact,
        error: summary.estimate.map(|estimate| (estimate - exact).abs()),
        summary,
    })
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let report = execute(args)?;
    match &args.out {
        Some(path) => write_json(path, &report)?,
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}
