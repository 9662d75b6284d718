use std::path::Path;

use mimc_core::{ErrorInfo, MimcError};
use mimc_engine::RunConfig;
use serde::{Deserialize, Serialize};

use crate::problems::Problem;

/// YAML document driving a demo run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Estimator configuration.
    pub run: RunConfig,
    /// Quantity of interest.
    pub problem: Problem,
    /// Master seed of the sampler.
    #[serde(default)]
    pub seed: u64,
}

impl SimConfig {
    /// Configuration for `problem` at tolerance `tol` with its rates filled
    /// in.
    pub fn template(problem: Problem, tol: f64) -> Self {
        let mut run = RunConfig::with_tol(tol);
        problem.fill_rates(&mut run);
        Self { run, problem, seed: 0 }
    }

    /// Parses a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MimcError> {
        serde_yaml::from_str(yaml)
            .map_err(|err| MimcError::Serde(ErrorInfo::new("yaml-deserialize", err.to_string())))
    }

    /// Reads and parses a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MimcError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|err| {
            MimcError::Config(
                ErrorInfo::new("config-read", err.to_string()).with_context("path", path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Renders the configuration as YAML.
    pub fn to_yaml_string(&self) -> Result<String, MimcError> {
        serde_yaml::to_string(self).map_err(|err| MimcError::Serde(ErrorInfo::new("yaml-serialize", err.to_string())))
    }

    /// Fills unset rates from the problem and validates the result.
    pub fn prepared(mut self) -> Result<Self, MimcError> {
        self.problem.fill_rates(&mut self.run);
        if self.run.dim() != Some(self.problem.dim()) {
            return Err(MimcError::Config(
                ErrorInfo::new("dimension-mismatch", "rate vectors do not match the problem dimension")
                    .with_context("problem", self.problem.name())
                    .with_context("dim", self.problem.dim().to_string()),
            ));
        }
        self.run.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_section_is_tagged() {
        let config = SimConfig::from_yaml_str("run:\n  tol: 0.05\nproblem:\n  kind: gbm\n  sigma: 0.3\nseed: 4\n").unwrap();
        assert_eq!(config.seed, 4);
        match config.problem {
            Problem::Gbm { sigma, steps, .. } => {
                assert_eq!(sigma, 0.3);
                assert_eq!(steps, 4);
            }
            other => panic!("unexpected problem {other:?}"),
        }
    }

    #[test]
    fn prepared_rejects_mismatched_dimensions() {
        let mut config = SimConfig::template(Problem::Geometric { w: 1.0, beta: 2.0 }, 0.1);
        config.run.w = Some(vec![1.0, 1.0]);
        config.run.s = Some(vec![2.0, 2.0]);
        config.run.gamma = Some(vec![1.0, 1.0]);
        config.run.beta = Some(vec![2.0, 2.0]);
        let err = config.prepared().unwrap_err();
        assert_eq!(err.info().code, "dimension-mismatch");
    }

    #[test]
    fn template_round_trips_through_yaml() {
        let config = SimConfig::template(
            Problem::Separable {
                w: vec![1.0, 2.0],
                beta: 2.0,
            },
            0.02,
        );
        let restored = SimConfig::from_yaml_str(&config.to_yaml_string().unwrap()).unwrap();
        assert_eq!(restored.problem, config.problem);
        assert_eq!(restored.run.w, Some(vec![1.0, 2.0]));
        assert!(restored.prepared().is_ok());
    }
}
