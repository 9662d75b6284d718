use std::error::Error;

use clap::{Parser, Subcommand};
use mimc_sim::commands::{
    rate::{self, RateArgs},
    run::{self, RunArgs},
    template::{self, TemplateArgs},
    tol_seq::{self, TolSeqArgs},
};

#[derive(Parser, Debug)]
#[command(name = "mimc-sim", about = "Adaptive multi-index Monte Carlo demo CLI")]
struct Cli {
    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the estimator on a demo problem described by a YAML file.
    Run(RunArgs),
    /// Print the complexity rate implied by weak, strong and work rates.
    Rate(RateArgs),
    /// Print the tolerance schedule a run would visit.
    TolSeq(TolSeqArgs),
    /// Print a starting YAML configuration for a demo problem.
    Template(TemplateArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    mimc_sim::init_tracing(cli.verbose);
    match cli.command {
        Command::Run(args) => run::run(&args),
        Command::Rate(args) => rate::run(&args),
        Command::TolSeq(args) => tol_seq::run(&args),
        Command::Template(args) => template::run(&args),
    }
}
