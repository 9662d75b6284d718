#![deny(missing_docs)]
#![doc = "Adaptive multi-index Monte Carlo: per-iteration statistics, bias estimators, sample allocation and the refinement controller."]

/// Optimal per-level sample allocation.
pub mod allocation;
/// Bayesian fit of the weak and strong error constants.
pub mod bayes;
/// Bias estimation strategies.
pub mod bias;
/// Run configuration.
pub mod config;
/// Mesh hierarchies, work models and schedule helpers.
pub mod hierarchy;
/// Per-iteration level statistics.
pub mod iteration;
/// Multilevel Richardson–Romberg combination weights.
pub mod ml2r;
/// Power sums and central moments.
pub mod moments;
/// Run summaries.
pub mod report;
/// The refinement controller.
pub mod run;
/// Sampler traits and adapters.
pub mod sampling;

pub use allocation::theoretical_sample_count;
pub use bayes::BayesianFit;
pub use bias::BiasEstimator;
pub use config::{BayesConfig, BiasConfig, RunConfig};
pub use hierarchy::{
    complexity_rate, confidence_factor, tol_sequence, ComplexityRate, GeometricHierarchy, GeometricWork, Hierarchy,
    WorkModel,
};
pub use iteration::{IterationState, LevelRole};
pub use ml2r::combination_weights;
pub use moments::PowerSums;
pub use report::{RunOutcome, RunSummary};
pub use run::{extend_by_profit, ExtendOutcome, ExtensionContext, LevelExtension, MimcRun, MimcRunBuilder, RunPhase};
pub use sampling::{LevelSampler, PerSampleAll, SampleAll, SampleBatch, SampleDraw, SumDraw, SumSampler, SumsSampleAll};
