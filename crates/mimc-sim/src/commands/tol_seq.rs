use std::error::Error;

use clap::Args;
use mimc_engine::tol_sequence;

#[derive(Args, Debug)]
pub struct TolSeqArgs {
    /// Final tolerance.
    #[arg(long)]
    pub tol: f64,
    /// Loosest tolerance of the ramp.
    #[arg(long)]
    pub max_tol: f64,
    /// Extra tolerances below the final one.
    #[arg(long, default_value_t = 2)]
    pub max_add: usize,
    /// Ratio between ramp tolerances.
    #[arg(long, default_value_t = std::f64::consts::SQRT_2)]
    pub r1: f64,
    /// Ratio between the extra tolerances.
    #[arg(long, default_value_t = 1.1)]
    pub r2: f64,
}

pub fn execute(args: &TolSeqArgs) -> Result<Vec<f64>, Box<dyn Error>> {
    if !(args.tol > 0.0 && args.max_tol >= args.tol) {
        return Err("expected 0 < tol <= max-tol".into());
    }
    if args.r1 <= 1.0 || args.r2 <= 1.0 {
        return Err("ratios must exceed one".into());
    }
    Ok(tol_sequence(args.tol, args.max_tol, args.max_add, args.r1, args.r2))
}

pub fn run(args: &TolSeqArgs) -> Result<(), Box<dyn Error>> {
    let tolerances = execute(args)?;
    println!("{}", serde_json::to_string(&tolerances)?);
    Ok(())
}
