use std::path::Path;

use mimc_core::{ErrorInfo, MimcError};
use serde::{Deserialize, Serialize};

use crate::hierarchy::tol_sequence;

/// YAML-configurable parameters of an adaptive MIMC run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Final target tolerance.
    pub tol: f64,
    /// Largest tolerance of the decreasing schedule. Without it the run
    /// targets `tol` directly.
    #[serde(default)]
    pub max_tol: Option<f64>,
    /// Confidence level of the statistical error bound.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Error splitting parameter, or its lower bound when not constant.
    #[serde(default = "default_theta")]
    pub theta: f64,
    /// Keep `theta` fixed instead of deriving it from the bias.
    #[serde(default)]
    pub const_theta: bool,
    /// Number of power sums tracked per level.
    #[serde(default = "default_moments")]
    pub moments: usize,
    /// Accumulate samples across iterations.
    #[serde(default = "default_true")]
    pub reuse_samples: bool,
    /// Bias estimation strategy.
    #[serde(default)]
    pub bias: BiasConfig,
    /// How many extra levels the Bayesian level search may add at once.
    #[serde(default = "default_inc_l")]
    pub inc_l: usize,
    /// Drop coarse levels whose variance makes them unprofitable.
    #[serde(default)]
    pub dynamic_first_lvl: bool,
    /// Minimum width of dense level projections.
    #[serde(default)]
    pub min_dim: usize,
    /// Minimum number of levels after a profit-driven extension.
    #[serde(default = "default_min_lvl")]
    pub min_lvl: usize,
    /// Cap on every level coordinate during profit-driven extension.
    #[serde(default)]
    pub max_lvl: Option<u32>,
    /// Initial number of samples per new level; the last entry is also the
    /// floor of the plain Monte Carlo estimate.
    #[serde(default = "default_m0")]
    pub m0: Vec<u64>,
    /// Extra tolerances appended below `tol` in the schedule.
    #[serde(default = "default_max_add_itr")]
    pub max_add_itr: usize,
    /// Ratio between consecutive tolerances above `tol`.
    #[serde(default = "default_r1")]
    pub r1: f64,
    /// Ratio between consecutive tolerances below `tol`.
    #[serde(default = "default_r2")]
    pub r2: f64,
    /// Inverse of the coarsest mesh size, per dimension.
    #[serde(default = "default_h0inv")]
    pub h0inv: Vec<f64>,
    /// Weak convergence rates.
    #[serde(default)]
    pub w: Option<Vec<f64>>,
    /// Strong convergence rates.
    #[serde(default)]
    pub s: Option<Vec<f64>>,
    /// Work rates.
    #[serde(default)]
    pub gamma: Option<Vec<f64>>,
    /// Refinement factors.
    #[serde(default)]
    pub beta: Option<Vec<f64>>,
    /// Bayesian prior settings.
    #[serde(default)]
    pub bayes: BayesConfig,
}

fn default_confidence() -> f64 {
    0.95
}

fn default_theta() -> f64 {
    0.5
}

fn default_moments() -> usize {
    4
}

fn default_true() -> bool {
    true
}

fn default_inc_l() -> usize {
    2
}

fn default_min_lvl() -> usize {
    3
}

fn default_m0() -> Vec<u64> {
    vec![1]
}

fn default_max_add_itr() -> usize {
    2
}

fn default_r1() -> f64 {
    std::f64::consts::SQRT_2
}

fn default_r2() -> f64 {
    1.1
}

fn default_h0inv() -> Vec<f64> {
    vec![2.0]
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tol: 1e-2,
            max_tol: None,
            confidence: default_confidence(),
            theta: default_theta(),
            const_theta: false,
            moments: default_moments(),
            reuse_samples: true,
            bias: BiasConfig::default(),
            inc_l: default_inc_l(),
            dynamic_first_lvl: false,
            min_dim: 0,
            min_lvl: default_min_lvl(),
            max_lvl: None,
            m0: default_m0(),
            max_add_itr: default_max_add_itr(),
            r1: default_r1(),
            r2: default_r2(),
            h0inv: default_h0inv(),
            w: None,
            s: None,
            gamma: None,
            beta: None,
            bayes: BayesConfig::default(),
        }
    }
}

/// Bias estimation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BiasConfig {
    /// Norm of the summed boundary contributions.
    #[default]
    Bnd,
    /// Sum of the boundary contribution norms.
    AbsBnd,
    /// Set-theoretic extrapolation by the level set.
    Setutil,
    /// Two-window Richardson–Romberg indicator.
    Ml2r,
    /// Fitted weak-error model.
    Bayesian,
}

/// Prior strengths of the Bayesian variance model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BayesConfig {
    /// Prior strength of the per-level mean.
    #[serde(default = "default_prior")]
    pub k0: f64,
    /// Prior strength of the per-level variance.
    #[serde(default = "default_prior")]
    pub k1: f64,
    /// Number of finest levels used to fit the rate constants.
    #[serde(default = "default_fit_lvls")]
    pub fit_lvls: usize,
}

fn default_prior() -> f64 {
    0.1
}

fn default_fit_lvls() -> usize {
    1000
}

impl Default for BayesConfig {
    fn default() -> Self {
        Self {
            k0: default_prior(),
            k1: default_prior(),
            fit_lvls: default_fit_lvls(),
        }
    }
}

impl RunConfig {
    /// Configuration targeting `tol` with every other field defaulted.
    pub fn with_tol(tol: f64) -> Self {
        Self {
            tol,
            ..Self::default()
        }
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, MimcError> {
        let config: RunConfig = serde_yaml::from_str(yaml)
            .map_err(|err| MimcError::Serde(ErrorInfo::new("yaml-deserialize", err.to_string())))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MimcError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|err| {
            MimcError::Config(
                ErrorInfo::new("config-read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// Renders the configuration as YAML.
    pub fn to_yaml_string(&self) -> Result<String, MimcError> {
        serde_yaml::to_string(self)
            .map_err(|err| MimcError::Serde(ErrorInfo::new("yaml-serialize", err.to_string())))
    }

    /// Number of dimensions implied by the rate vectors, if any is set.
    pub fn dim(&self) -> Option<usize> {
        self.rate_vectors().map(|(_, rates)| rates.len()).next()
    }

    /// Tolerances the run visits, in decreasing order.
    pub fn tolerances(&self) -> Vec<f64> {
        match self.max_tol {
            Some(max_tol) => tol_sequence(self.tol, max_tol, self.max_add_itr, self.r1, self.r2),
            None => vec![self.tol],
        }
    }

    /// Checks internal consistency.
    pub fn validate(&self) -> Result<(), MimcError> {
        let mut lengths = self.rate_vectors();
        if let Some((first_name, first)) = lengths.next() {
            for (name, rates) in lengths {
                if rates.len() != first.len() {
                    return Err(MimcError::Config(
                        ErrorInfo::new("dimension-mismatch", "rate vectors must have the same length")
                            .with_context(first_name, first.len().to_string())
                            .with_context(name, rates.len().to_string()),
                    ));
                }
            }
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(invalid("invalid-tolerance", "tol must be positive and finite", "tol", self.tol));
        }
        if let Some(max_tol) = self.max_tol {
            if max_tol < self.tol {
                return Err(invalid("invalid-tolerance", "max_tol must not be below tol", "max_tol", max_tol));
            }
            if self.r1 <= 1.0 {
                return Err(invalid("invalid-ratio", "r1 must exceed one", "r1", self.r1));
            }
            if self.max_add_itr > 0 && self.r2 <= 1.0 {
                return Err(invalid("invalid-ratio", "r2 must exceed one", "r2", self.r2));
            }
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(invalid("invalid-confidence", "confidence must lie in (0, 1)", "confidence", self.confidence));
        }
        if !(self.theta > 0.0 && self.theta <= 1.0) {
            return Err(invalid("invalid-theta", "theta must lie in (0, 1]", "theta", self.theta));
        }
        if self.moments == 0 {
            return Err(MimcError::config("invalid-moments", "at least one moment must be tracked"));
        }
        if self.m0.is_empty() {
            return Err(MimcError::config("invalid-m0", "m0 must hold at least one sample count"));
        }
        match self.bias {
            BiasConfig::Ml2r if self.w.is_none() || self.beta.is_none() => Err(MimcError::Config(
                ErrorInfo::new("ml2r-needs-rates", "ML2R bias estimation requires w and beta")
                    .with_hint("set `w` and `beta` in the configuration"),
            )),
            BiasConfig::Bayesian if self.w.is_none() || self.s.is_none() => Err(MimcError::Config(
                ErrorInfo::new("bayes-needs-rates", "Bayesian fitting requires w and s")
                    .with_hint("set `w` and `s` in the configuration"),
            )),
            BiasConfig::Bayesian if self.moments < 2 => Err(MimcError::config(
                "bayes-needs-variance",
                "Bayesian fitting requires at least two moments",
            )),
            _ => Ok(()),
        }
    }

    fn rate_vectors(&self) -> impl Iterator<Item = (&'static str, &Vec<f64>)> {
        [("w", &self.w), ("s", &self.s), ("gamma", &self.gamma), ("beta", &self.beta)]
            .into_iter()
            .filter_map(|(name, rates)| rates.as_ref().map(|rates| (name, rates)))
    }
}

fn invalid(code: &str, message: &str, field: &str, value: f64) -> MimcError {
    MimcError::Config(ErrorInfo::new(code, message).with_context(field, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults_fill_missing_fields() {
        let config = RunConfig::from_yaml_str("tol: 0.01\nbias: abs-bnd\nbayes:\n  k0: 0.5\n").unwrap();
        assert_eq!(config.confidence, 0.95);
        assert_eq!(config.moments, 4);
        assert!(config.reuse_samples);
        assert_eq!(config.bias, BiasConfig::AbsBnd);
        assert_eq!(config.bayes.k0, 0.5);
        assert_eq!(config.bayes.fit_lvls, 1000);
        assert_eq!(config.m0, vec![1]);
    }

    #[test]
    fn tolerance_is_required() {
        let err = RunConfig::from_yaml_str("theta: 0.3\n").unwrap_err();
        assert_eq!(err.info().code, "yaml-deserialize");
    }

    #[test]
    fn single_tolerance_without_schedule() {
        assert_eq!(RunConfig::with_tol(0.2).tolerances(), vec![0.2]);
    }

    #[test]
    fn rate_vector_lengths_must_agree() {
        let mut config = RunConfig::with_tol(0.1);
        config.w = Some(vec![1.0, 1.0]);
        config.gamma = Some(vec![1.0]);
        let err = config.validate().unwrap_err();
        assert_eq!(err.info().code, "dimension-mismatch");
        assert_eq!(err.info().context.get("gamma").map(String::as_str), Some("1"));
    }

    #[test]
    fn strategy_requirements_are_checked() {
        let mut config = RunConfig::with_tol(0.1);
        config.bias = BiasConfig::Bayesian;
        assert_eq!(config.validate().unwrap_err().info().code, "bayes-needs-rates");
        config.bias = BiasConfig::Ml2r;
        assert_eq!(config.validate().unwrap_err().info().code, "ml2r-needs-rates");
    }
}
