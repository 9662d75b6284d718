use std::error::Error;

use clap::Args;
use mimc_engine::{complexity_rate, ComplexityRate};

#[derive(Args, Debug)]
pub struct RateArgs {
    /// Weak rates, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub w: Vec<f64>,
    /// Strong rates, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub s: Vec<f64>,
    /// Work rates, comma separated.
    #[arg(long, value_delimiter = ',', required = true)]
    pub gamma: Vec<f64>,
}

pub fn execute(args: &RateArgs) -> Result<ComplexityRate, Box<dyn Error>> {
    Ok(complexity_rate(&args.w, &args.s, &args.gamma)?)
}

pub fn run(args: &RateArgs) -> Result<(), Box<dyn Error>> {
    let rate = execute(args)?;
    println!("{}", serde_json::to_string_pretty(&rate)?);
    Ok(())
}
