use std::error::Error;
use std::fs;
use std::path::PathBuf;

use clap::{Args, ValueEnum};

use crate::problems::Problem;
use crate::sim_config::SimConfig;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ProblemKind {
    Geometric,
    NoisyGeometric,
    Gbm,
    Separable,
}

impl ProblemKind {
    pub fn problem(self) -> Problem {
        match self {
            ProblemKind::Geometric => Problem::Geometric { w: 1.0, beta: 2.0 },
            ProblemKind::NoisyGeometric => Problem::NoisyGeometric {
                w: 1.0,
                s: 2.0,
                beta: 2.0,
                spread: 0.5,
            },
            ProblemKind::Gbm => Problem::Gbm {
                mu: 0.05,
                sigma: 0.2,
                s0: 1.0,
                horizon: 1.0,
                steps: 4,
            },
            ProblemKind::Separable => Problem::Separable {
                w: vec![1.0, 2.0],
                beta: 2.0,
            },
        }
    }
}

#[derive(Args, Debug)]
pub struct TemplateArgs {
    /// Demo problem to configure.
    #[arg(long, value_enum)]
    pub problem: ProblemKind,
    /// Target tolerance.
    #[arg(long, default_value_t = 0.01)]
    pub tol: f64,
    /// Output file; printed to stdout when absent.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

pub fn execute(args: &TemplateArgs) -> Result<String, Box<dyn Error>> {
    Ok(SimConfig::template(args.problem.problem(), args.tol).to_yaml_string()?)
}

pub fn run(args: &TemplateArgs) -> Result<(), Box<dyn Error>> {
    let yaml = execute(args)?;
    match &args.out {
        Some(path) => fs::write(path, yaml)?,
        None => print!("{yaml}"),
    }
    Ok(())
}
