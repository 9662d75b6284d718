//! Demo problems and command implementations behind the `mimc-sim` binary.

use std::error::Error;
use std::fs;
use std::path::Path;

use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod problems;
pub mod sim_config;

/// Writes `value` as pretty JSON, creating parent directories.
pub fn write_json<P: AsRef<Path>, T: serde::Serialize>(path: P, value: &T) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

/// Installs a stderr subscriber honouring `RUST_LOG`. A second call is a
/// no-op.
pub fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
