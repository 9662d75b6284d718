use mimc_core::{ErrorInfo, MimcError, MultiIndex, SampleValue};
use serde::{Deserialize, Serialize};

use crate::bayes::BayesianFit;
use crate::iteration::LevelRole;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunOutcome {
    /// The final tolerance was met.
    Converged,
    /// The level set could not be extended any further.
    Exhausted,
    /// Every scheduled tolerance was visited without meeting the final one.
    ToleranceNotMet,
}

/// Summary returned to callers after a run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "V: SampleValue")]
pub struct RunSummary<V> {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Multi-index estimate of the expectation.
    pub estimate: Option<V>,
    /// Bias estimate of the last iteration.
    pub bias: f64,
    /// Statistical error estimate of the last iteration.
    pub stat_error: f64,
    /// `bias + stat_error`.
    pub total_error: f64,
    /// Tolerance targeted by the last iteration.
    pub tolerance: f64,
    /// Error splitting parameter of the last iteration.
    pub theta: f64,
    /// Levels in position order.
    pub levels: Vec<MultiIndex>,
    /// Role of each level.
    pub roles: Vec<LevelRole>,
    /// Samples per level in the last iteration.
    pub samples: Vec<u64>,
    /// Variance estimate per level.
    pub variance: Vec<f64>,
    /// Work per sample per level.
    pub work_per_sample: Vec<f64>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// First usable level at the end of the run.
    pub start_level: u32,
    /// Wall-clock seconds spent in the run.
    pub total_time: f64,
    /// Total work over every level.
    pub total_work: f64,
    /// Fitted rate constants of Bayesian runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<BayesianFit>,
}

impl<V: SampleValue> RunSummary<V> {
    /// Whether the final tolerance was met.
    pub fn converged(&self) -> bool {
        self.outcome == RunOutcome::Converged
    }

    /// Pretty JSON rendering. Non-finite numbers are written as `null`.
    pub fn to_json_pretty(&self) -> Result<String, MimcError> {
        serde_json::to_string_pretty(self)
            .map_err(|err| MimcError::Serde(ErrorInfo::new("json-serialize", err.to_string())))
    }
}
