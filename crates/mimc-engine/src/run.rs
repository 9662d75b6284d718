use std::cmp::Ordering;
use std::time::Instant;

use mimc_core::{ErrorInfo, LevelSet, MimcError, MultiIndex, ProfitCalculator, SampleValue};
use mimc_set::{IndexSet, TotalDegreeProfit};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::allocation::theoretical_sample_count;
use crate::bayes::BayesianFit;
use crate::bias::BiasEstimator;
use crate::config::RunConfig;
use crate::hierarchy::{confidence_factor, GeometricHierarchy, GeometricWork, Hierarchy, WorkModel};
use crate::iteration::{IterationState, LevelRole};
use crate::ml2r::combination_weights;
use crate::moments::norms;
use crate::report::{RunOutcome, RunSummary};
use crate::sampling::{LevelSampler, PerSampleAll, SampleAll, SumSampler, SumsSampleAll};

/// Where the controller is in its refinement loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunPhase {
    /// Deciding whether the level set must grow.
    AwaitingExtension,
    /// Drawing samples.
    Sampling,
    /// Recomputing estimates from the accumulated sums.
    Estimating,
    /// The final tolerance was met.
    Converged,
    /// The tolerance schedule ended without meeting the final tolerance.
    NeedsMoreLevels,
    /// The level set cannot grow any further.
    Exhausted,
}

/// Diagnostics handed to a level extension.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtensionContext {
    /// Current bias estimate.
    pub bias: f64,
    /// Tolerance being targeted.
    pub tolerance: f64,
    /// Minimum error splitting parameter.
    pub theta: f64,
}

impl ExtensionContext {
    /// Whether the bias already fits in its share of the tolerance.
    pub fn bias_within_budget(&self) -> bool {
        self.bias < (1.0 - self.theta) * self.tolerance
    }
}

/// Result of one call of a level extension.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtendOutcome {
    /// The set was extended, or did not need to be. `samples` optionally
    /// gives a minimum sample count per level position.
    Extended {
        /// Minimum samples per level position; shorter vectors are padded
        /// with the initial sample count.
        samples: Option<Vec<u64>>,
    },
    /// No admissible level remains.
    Exhausted,
}

type CustomExtension = Box<dyn FnMut(&mut dyn LevelSet, &ExtensionContext) -> Result<ExtendOutcome, MimcError>>;
type StartHook<V> = Box<dyn FnMut(&IterationState<V>)>;
type DoneHook<V> = Box<dyn FnMut(&IterationState<V>) -> bool>;

/// How the level set grows between iterations.
pub enum LevelExtension {
    /// Profit-driven expansion of the set.
    Profit {
        /// Ranks candidate levels.
        calculator: Box<dyn ProfitCalculator>,
        /// Minimum number of levels after an extension.
        min_levels: usize,
    },
    /// Caller-provided extension.
    Custom(CustomExtension),
}

impl LevelExtension {
    /// Profit-driven extension with `calculator`.
    pub fn profit(calculator: impl ProfitCalculator + 'static, min_levels: usize) -> Self {
        LevelExtension::Profit {
            calculator: Box::new(calculator),
            min_levels,
        }
    }

    /// Extension delegated to `extend`.
    pub fn custom<F>(extend: F) -> Self
    where
        F: FnMut(&mut dyn LevelSet, &ExtensionContext) -> Result<ExtendOutcome, MimcError> + 'static,
    {
        LevelExtension::Custom(Box::new(extend))
    }
}

/// Default extension: grow the set by profit until it holds at least
/// `min_levels` levels, skipping the step entirely while the bias is within
/// budget.
pub fn extend_by_profit(
    levels: &mut dyn LevelSet,
    calculator: &dyn ProfitCalculator,
    min_levels: usize,
    ctx: &ExtensionContext,
) -> Result<ExtendOutcome, MimcError> {
    if ctx.bias_within_budget() {
        return Ok(ExtendOutcome::Extended { samples: None });
    }
    let mut expansions = 0;
    if levels.is_empty() {
        levels.add_from_list(&[MultiIndex::seed()])?;
        expansions = 1;
    }
    while expansions < 1 || levels.len() < min_levels {
        let added = levels.expand_set(calculator, Some(calculator.max_dim()), None)?;
        if added == 0 {
            return Ok(ExtendOutcome::Exhausted);
        }
        expansions += 1;
    }
    Ok(ExtendOutcome::Extended { samples: None })
}

/// `a <= b` up to a relative tolerance of `1e-9`.
fn less(a: f64, b: f64) -> bool {
    a - b <= 1e-9 * a.abs().max(b.abs())
}

/// Adaptive MIMC controller.
///
/// Owns the level set, the sampler and the per-iteration statistics. Each
/// tolerance of the schedule is refined until its error estimate is met:
/// the set is extended when the bias dominates, then samples are allocated
/// with the optimal per-level formula.
pub struct MimcRun<V: SampleValue = f64> {
    config: RunConfig,
    levels: Box<dyn LevelSet>,
    sampler: Box<dyn SampleAll<V>>,
    work_model: Option<Box<dyn WorkModel>>,
    hierarchy: Option<Box<dyn Hierarchy>>,
    extension: LevelExtension,
    bias_estimator: BiasEstimator,
    on_iteration_start: Option<StartHook<V>>,
    on_iteration_done: Option<DoneHook<V>>,
    history: Vec<IterationState<V>>,
    current: IterationState<V>,
    started: bool,
    all_itr: Option<IterationState<V>>,
    start_level: u32,
    confidence_factor: f64,
    phase: RunPhase,
    exhausted: bool,
}

impl<V: SampleValue> MimcRun<V> {
    /// Starts building a run from `config`.
    pub fn builder(config: RunConfig) -> MimcRunBuilder<V> {
        MimcRunBuilder::new(config)
    }

    /// Run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Current level set.
    pub fn levels(&self) -> &dyn LevelSet {
        self.levels.as_ref()
    }

    /// State of the iteration in progress (or the last one).
    pub fn current(&self) -> &IterationState<V> {
        &self.current
    }

    /// Statistics over every sample drawn. Equal to [`Self::current`] when
    /// samples are reused across iterations.
    pub fn all_samples(&self) -> &IterationState<V> {
        self.all()
    }

    /// Every iteration started so far, oldest first.
    pub fn iterations(&self) -> impl Iterator<Item = &IterationState<V>> {
        self.history.iter().chain(self.started.then_some(&self.current))
    }

    /// Number of iterations started so far.
    pub fn iteration_count(&self) -> usize {
        self.history.len() + usize::from(self.started)
    }

    /// Current phase.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// First usable level.
    pub fn start_level(&self) -> u32 {
        self.start_level
    }

    /// `Ca`, the normal quantile for the configured confidence.
    pub fn confidence_factor(&self) -> f64 {
        self.confidence_factor
    }

    /// Current multi-index estimate.
    pub fn expectation(&self) -> Option<V> {
        self.current.expectation()
    }

    /// Runs the configured tolerance schedule towards the configured
    /// tolerance.
    pub fn run(&mut self) -> Result<RunSummary<V>, MimcError> {
        let tolerances = self.config.tolerances();
        let final_tol = self.config.tol;
        self.run_tolerances(&tolerances, final_tol)
    }

    /// Runs an explicit, non-increasing tolerance schedule. Each tolerance is
    /// refined until its error estimate meets `max(tol, final_tol)`. The run
    /// stops at the first tolerance at or below `final_tol` whose error
    /// estimate meets `final_tol`; later tolerances act as retries.
    pub fn run_tolerances(&mut self, tolerances: &[f64], final_tol: f64) -> Result<RunSummary<V>, MimcError> {
        if tolerances.is_empty() {
            return Err(MimcError::config("empty-tolerances", "at least one tolerance is required"));
        }
        if let Some(pair) = tolerances.windows(2).find(|pair| pair[1] > pair[0]) {
            return Err(MimcError::Config(
                ErrorInfo::new("non-monotonic-tolerances", "tolerances must be given in decreasing order")
                    .with_context("previous", pair[0].to_string())
                    .with_context("next", pair[1].to_string()),
            ));
        }
        let clock = Instant::now();
        let bayesian = self.bias_estimator.is_bayesian();
        let mut add_new_iteration = false;
        let mut converged = false;
        info!(tolerances = tolerances.len(), final_tol, "starting MIMC run");

        for &tol in tolerances {
            let mut samples_added = false;
            self.exhausted = false;
            loop {
                if !self.started {
                    self.started = true;
                } else if add_new_iteration {
                    let next = self.current.next_itr();
                    self.history.push(std::mem::replace(&mut self.current, next));
                }
                add_new_iteration = false;
                self.current.tolerance = Some(tol);
                if let Some(hook) = self.on_iteration_start.as_mut() {
                    hook(&self.current);
                }

                let levels_before = self.levels.len();
                let mut progressed = false;
                if bayesian && self.current.level_count() > 0 {
                    let count = self.current.level_count();
                    let target = self.estimate_optimal_level_count(tol)?;
                    if target > count {
                        debug!(from = count, to = target, "extending to the optimal level count");
                        let new_levels: Vec<MultiIndex> =
                            (count as u32..target as u32).map(MultiIndex::level).collect();
                        self.extend_levels(Some(new_levels))?;
                        self.update_active_levels()?;
                        self.estimate_all()?;
                    }
                } else {
                    self.set_phase(RunPhase::AwaitingExtension);
                    let Some(targets) = self.extend_levels(None)? else {
                        warn!(tol, levels = self.levels.len(), "level set exhausted, stopping refinement");
                        self.exhausted = true;
                        self.set_phase(RunPhase::Exhausted);
                        break;
                    };
                    self.update_active_levels()?;
                    let added = self.gen_samples(&targets)?;
                    samples_added |= added;
                    progressed |= added;
                }

                let theta = self.calc_theta(tol, self.current.bias);
                self.current.theta = theta;
                self.check_levels()?;
                let work = self.work_estimates();
                let targets = theoretical_sample_count(
                    tol,
                    theta,
                    &self.current.variance_estimate,
                    &work,
                    self.current.roles(),
                    self.confidence_factor,
                    1,
                );
                if !self.config.reuse_samples {
                    self.current.zero_samples();
                }
                let added = self.gen_samples(&targets)?;
                samples_added |= added;
                progressed |= added;

                self.current.total_time = Some(clock.elapsed().as_secs_f64());
                info!(
                    tol,
                    bias = self.current.bias,
                    stat_error = self.current.stat_error,
                    total_error = self.current.total_error_est(),
                    levels = self.levels.len(),
                    samples = self.current.total_samples(),
                    "iteration finished"
                );
                debug!("\n{}", self.current.level_table(self.levels.as_ref()));

                if samples_added {
                    if let Some(hook) = self.on_iteration_done.as_mut() {
                        add_new_iteration = hook(&self.current);
                    }
                }
                // Retry tolerances below the final one stop as soon as the
                // final tolerance is met.
                if bayesian || self.current.satisfies(tol.max(final_tol)) {
                    break;
                }
                if !progressed && self.levels.len() == levels_before {
                    warn!(tol, total_error = self.current.total_error_est(), "no refinement possible at this tolerance");
                    break;
                }
            }

            if less(tol, final_tol) && self.current.total_error_est() <= final_tol {
                converged = true;
                break;
            }
            add_new_iteration = true;
        }

        let outcome = if converged {
            RunOutcome::Converged
        } else if self.exhausted {
            RunOutcome::Exhausted
        } else {
            RunOutcome::ToleranceNotMet
        };
        self.set_phase(match outcome {
            RunOutcome::Converged => RunPhase::Converged,
            RunOutcome::Exhausted => RunPhase::Exhausted,
            RunOutcome::ToleranceNotMet => RunPhase::NeedsMoreLevels,
        });
        let summary = self.summary(outcome, clock.elapsed().as_secs_f64());
        info!(
            outcome = ?summary.outcome,
            total_error = summary.total_error,
            iterations = summary.iterations,
            total_work = summary.total_work,
            "MIMC run finished"
        );
        Ok(summary)
    }

    /// Error splitting parameter for `tol` given `bias`: the configured
    /// value when constant, otherwise `max(1 - bias/tol, θ)`.
    pub fn calc_theta(&self, tol: f64, bias: f64) -> f64 {
        if self.config.const_theta {
            return self.config.theta;
        }
        let theta = if tol > 0.0 { 1.0 - bias / tol } else { f64::INFINITY };
        theta.max(self.config.theta)
    }

    /// Samples a plain Monte Carlo estimator would need at the seed level
    /// to reach `tol`. `None` while the seed variance is unknown.
    pub fn estimate_monte_carlo_samples(&self, tol: f64) -> Option<u64> {
        let theta = self.calc_theta(tol, self.current.bias);
        let pos = self.levels.find(&MultiIndex::seed())?;
        let variance = *self.current.variance_estimate.get(pos)?;
        if variance.is_nan() {
            return None;
        }
        let floor = self.config.m0.last().copied().unwrap_or(1);
        let samples = ((theta * tol / self.confidence_factor).powi(-2) * variance).ceil();
        Some(floor.max(samples as u64))
    }

    /// Level count in `count..=count + inc_l` minimising the predicted
    /// work to reach `tol` under the fitted model. Bayesian runs only.
    pub fn estimate_optimal_level_count(&self, tol: f64) -> Result<usize, MimcError> {
        if !self.bias_estimator.is_bayesian() {
            return Err(MimcError::config(
                "bayes-required",
                "the optimal level count is only available to Bayesian runs",
            ));
        }
        let hierarchy = self.hierarchy.as_deref().ok_or_else(needs_hierarchy)?;
        let work_model = self.work_model.as_deref().ok_or_else(needs_work_model)?;
        let fit = self.current.fit.unwrap_or_else(|| self.unfitted());
        let count = self.current.level_count();
        let last = count + self.config.inc_l;
        let mut best = count;
        let mut best_work = f64::INFINITY;
        for candidate in count..=last {
            let bias = fit.bias(hierarchy, candidate.saturating_sub(1))?;
            if bias >= tol && candidate < last {
                continue;
            }
            let indices: Vec<MultiIndex> = (0..candidate as u32).map(MultiIndex::level).collect();
            let work = work_model.work(&indices);
            let finest = Some(candidate.saturating_sub(1));
            let variance = fit.variance_estimate(self.all(), hierarchy, &self.config.bayes, finest)?;
            let mut roles = self.current.roles().to_vec();
            roles.resize(candidate, LevelRole::Active);
            let samples = theoretical_sample_count(
                tol,
                self.calc_theta(tol, bias),
                &variance,
                &work,
                &roles,
                self.confidence_factor,
                1,
            );
            let total: f64 = work.iter().zip(&samples).map(|(w, &m)| w * m as f64).sum();
            debug!(candidate, bias, total_work = total, "level count candidate");
            if total < best_work {
                best = candidate;
                best_work = total;
            }
        }
        Ok(best)
    }

    fn all(&self) -> &IterationState<V> {
        self.all_itr.as_ref().unwrap_or(&self.current)
    }

    fn model(&self) -> Option<(&BayesianFit, &dyn Hierarchy)> {
        Some((self.current.fit.as_ref()?, self.hierarchy.as_deref()?))
    }

    fn unfitted(&self) -> BayesianFit {
        let first = |rates: &Option<Vec<f64>>| rates.as_ref().and_then(|rates| rates.first().copied());
        BayesianFit::unfitted(
            first(&self.config.w).unwrap_or(f64::NAN),
            first(&self.config.s).unwrap_or(f64::NAN),
        )
    }

    fn set_phase(&mut self, phase: RunPhase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "run phase");
            self.phase = phase;
        }
    }

    fn sync_level_count(&mut self) {
        let count = self.levels.len();
        self.current.levels_added(count);
        if let Some(all) = self.all_itr.as_mut() {
            all.levels_added(count);
        }
    }

    /// Grows the set with `new_levels`, or through the configured extension
    /// when `None`. Returns the minimum sample count per level position, or
    /// `None` once the set is exhausted.
    fn extend_levels(&mut self, new_levels: Option<Vec<MultiIndex>>) -> Result<Option<Vec<u64>>, MimcError> {
        let outcome = match new_levels {
            Some(indices) => {
                self.levels.add_from_list(&indices)?;
                ExtendOutcome::Extended { samples: None }
            }
            None => {
                let ctx = ExtensionContext {
                    bias: self.current.bias,
                    tolerance: self.current.tolerance.unwrap_or(self.config.tol),
                    theta: self.config.theta,
                };
                match &mut self.extension {
                    LevelExtension::Profit { calculator, min_levels } => {
                        extend_by_profit(self.levels.as_mut(), calculator.as_ref(), *min_levels, &ctx)?
                    }
                    LevelExtension::Custom(extend) => extend(self.levels.as_mut(), &ctx)?,
                }
            }
        };
        let before = self.current.level_count();
        self.sync_level_count();
        if self.levels.len() > before {
            debug!(from = before, to = self.levels.len(), "level set extended");
        }
        self.update_ml2r_weights()?;
        let ExtendOutcome::Extended { samples } = outcome else {
            return Ok(None);
        };
        let initial = |pos: usize| {
            self.config
                .m0
                .get(pos)
                .or(self.config.m0.last())
                .copied()
                .unwrap_or(1)
        };
        let counts = self.current.counts();
        Ok(Some(
            (0..self.levels.len())
                .map(|pos| {
                    let minimum = samples.as_ref().and_then(|samples| samples.get(pos).copied());
                    counts[pos].max(minimum.unwrap_or_else(|| initial(pos)))
                })
                .collect(),
        ))
    }

    /// Recomputes level roles from the first usable level: levels beyond it
    /// are active, levels before it inactive, and the first usable level
    /// itself is the base.
    fn update_active_levels(&mut self) -> Result<(), MimcError> {
        let start = self.start_level;
        let roles: Vec<LevelRole> = self
            .levels
            .dense_matrix()
            .iter()
            .map(|row| {
                let first = row.first().copied().unwrap_or(0);
                match first.cmp(&start) {
                    Ordering::Greater => LevelRole::Active,
                    Ordering::Equal if row.iter().skip(1).all(|&c| c == 0) => LevelRole::Base,
                    Ordering::Equal => LevelRole::Active,
                    Ordering::Less => LevelRole::Inactive,
                }
            })
            .collect();
        if let Some(all) = self.all_itr.as_mut() {
            all.set_roles(roles.clone())?;
        }
        self.current.set_roles(roles)?;
        self.update_ml2r_weights()
    }

    fn update_ml2r_weights(&mut self) -> Result<(), MimcError> {
        let BiasEstimator::Ml2r { alpha } = self.bias_estimator else {
            return Ok(());
        };
        if self.levels.max_dim() > 1 {
            return Err(MimcError::config(
                "ml2r-multi-dim",
                "ML2R weights support one-dimensional levels only",
            ));
        }
        let count = self.current.level_count();
        let used: Vec<(usize, u32)> = self
            .current
            .roles()
            .iter()
            .enumerate()
            .filter(|(_, role)| role.is_used())
            .map(|(pos, _)| (pos, self.levels.get(pos).map_or(0, |level| level.get(0))))
            .collect();
        let mut weights = vec![1.0; count];
        let min = used.iter().map(|(_, ell)| *ell).min();
        let max = used.iter().map(|(_, ell)| *ell).max();
        if let (Some(min), Some(max)) = (min, max) {
            let cumulative = combination_weights(alpha, (max - min) as usize);
            for (pos, ell) in used {
                weights[pos] = cumulative[(ell - min) as usize];
            }
        }
        if let Some(all) = self.all_itr.as_mut() {
            all.set_weights(weights.clone())?;
        }
        self.current.set_weights(weights)
    }

    /// Drops the first usable level when sampling it as a control variate
    /// costs more than sampling the next level directly.
    fn check_levels(&mut self) -> Result<(), MimcError> {
        if !self.config.dynamic_first_lvl {
            return Ok(());
        }
        if self.levels.max_dim() > 1 {
            return Err(MimcError::config(
                "dynamic-first-level-multi-dim",
                "a dynamic first level requires one-dimensional levels",
            ));
        }
        let start = self.start_level;
        let (Some(base), Some(next)) = (
            self.levels.find(&MultiIndex::level(start)),
            self.levels.find(&MultiIndex::level(start + 1)),
        ) else {
            return Ok(());
        };
        let wl = self.current.calc_wl();
        let delta_v = norms(self.current.delta_central_moment(2, true));
        let fine_v = norms(self.current.fine_central_moment(2, true));
        let with_base = (delta_v[next] * wl[next]).sqrt() + (fine_v[base] * wl[base]).sqrt();
        let without_base = (fine_v[next] * wl[next]).sqrt();
        if with_base > without_base {
            self.start_level += 1;
            info!(start_level = self.start_level, "raising the first usable level");
            self.update_active_levels()?;
            self.estimate_all()?;
        }
        Ok(())
    }

    /// Work per sample per level. Levels without samples fall back to the
    /// work model when one is available.
    fn work_estimates(&self) -> Vec<f64> {
        let mut work = self.all().calc_wl();
        if let Some(model) = self.work_model.as_deref() {
            if work.iter().any(|&w| w <= 0.0) {
                let modelled = model.work(&self.levels.indices());
                for (w, m) in work.iter_mut().zip(modelled) {
                    if *w <= 0.0 {
                        *w = m;
                    }
                }
            }
        }
        work
    }

    /// Tops used levels up to `targets` samples. Returns whether any sample
    /// was drawn.
    fn gen_samples(&mut self, targets: &[u64]) -> Result<bool, MimcError> {
        let count = self.levels.len();
        let counts = self.current.counts();
        let roles = self.current.roles();
        let requested: Vec<u64> = (0..count)
            .map(|pos| {
                let target = targets.get(pos).copied().unwrap_or(0);
                if roles[pos].is_used() && target > counts[pos] {
                    target - counts[pos]
                } else {
                    0
                }
            })
            .collect();
        if requested.iter().all(|&n| n == 0) {
            return Ok(false);
        }
        self.set_phase(RunPhase::Sampling);
        let batch = self
            .sampler
            .sample_all(self.levels.as_ref(), &requested, self.config.moments, self.work_model.as_deref())?;
        if batch.len() != count {
            return Err(MimcError::Sampling(
                ErrorInfo::new("batch-shape", "sampler returned a batch of the wrong width")
                    .with_context("expected", count.to_string())
                    .with_context("received", batch.len().to_string()),
            ));
        }
        for pos in 0..count {
            let drawn = batch.counts[pos];
            if drawn == 0 {
                continue;
            }
            let (Some(delta), Some(fine)) = (&batch.delta_sums[pos], &batch.fine_sums[pos]) else {
                return Err(MimcError::Sampling(
                    ErrorInfo::new("missing-sums", "sampler reported samples without power sums")
                        .with_context("position", pos.to_string()),
                ));
            };
            if let Some(all) = self.all_itr.as_mut() {
                all.add_samples(pos, drawn, delta, fine, batch.time[pos], batch.work[pos])?;
            }
            self.current
                .add_samples(pos, drawn, delta, fine, batch.time[pos], batch.work[pos])?;
        }
        self.estimate_all()?;
        Ok(true)
    }

    /// Refreshes the fit, variance, statistical error and bias estimates.
    fn estimate_all(&mut self) -> Result<(), MimcError> {
        self.set_phase(RunPhase::Estimating);
        if self.bias_estimator.is_bayesian() {
            let hierarchy = self.hierarchy.as_deref().ok_or_else(needs_hierarchy)?;
            let mut fit = self.current.fit.unwrap_or_else(|| self.unfitted());
            fit.fit(self.all(), hierarchy, self.config.bayes.fit_lvls)?;
            self.current.fit = Some(fit);
        }

        let count = self.current.level_count();
        if self.config.moments >= 2 {
            let mut variance = match (self.bias_estimator.is_bayesian(), self.model()) {
                (true, Some((fit, hierarchy))) => {
                    fit.variance_estimate(self.all(), hierarchy, &self.config.bayes, None)?
                }
                _ => norms(self.all().calc_vl()),
            };
            variance.resize(count, f64::NAN);
            for (value, role) in variance.iter_mut().zip(self.current.roles()) {
                if !role.is_used() {
                    *value = f64::NAN;
                } else if *value < 0.0 {
                    *value = 0.0;
                }
            }
            self.current.variance_estimate = variance;
        }

        let counts = self.current.counts();
        let used = || {
            self.current
                .roles()
                .iter()
                .zip(counts)
                .zip(&self.current.variance_estimate)
                .filter(|((role, _), _)| role.is_used())
        };
        let stat_error = if used().any(|((_, &m), _)| m == 0) {
            f64::INFINITY
        } else {
            self.confidence_factor * used().map(|((_, &m), v)| v / m as f64).sum::<f64>().sqrt()
        };
        let bias = self
            .bias_estimator
            .estimate(&self.current, self.levels.as_ref(), self.model())?;
        self.current.stat_error = stat_error;
        self.current.bias = bias;
        Ok(())
    }

    fn summary(&self, outcome: RunOutcome, total_time: f64) -> RunSummary<V> {
        let state = &self.current;
        RunSummary {
            outcome,
            estimate: state.expectation(),
            bias: state.bias,
            stat_error: state.stat_error,
            total_error: state.total_error_est(),
            tolerance: state.tolerance.unwrap_or(self.config.tol),
            theta: state.theta,
            levels: self.levels.indices(),
            roles: state.roles().to_vec(),
            samples: state.counts().to_vec(),
            variance: state.variance_estimate.clone(),
            work_per_sample: self.all().calc_wl(),
            iterations: self.iteration_count(),
            start_level: self.start_level,
            total_time,
            total_work: self.all().total_work(),
            fit: state.fit,
        }
    }
}

fn needs_hierarchy() -> MimcError {
    MimcError::Config(
        ErrorInfo::new("bayes-needs-hierarchy", "Bayesian runs require a mesh hierarchy")
            .with_hint("set beta and h0inv, or pass a hierarchy to the builder"),
    )
}

fn needs_work_model() -> MimcError {
    MimcError::Config(
        ErrorInfo::new("bayes-needs-work-model", "Bayesian runs require a work model")
            .with_hint("set gamma, or pass a work model to the builder"),
    )
}

/// Assembles a [`MimcRun`], filling in defaults derived from the config.
pub struct MimcRunBuilder<V: SampleValue = f64> {
    config: RunConfig,
    levels: Option<Box<dyn LevelSet>>,
    sampler: Option<Box<dyn SampleAll<V>>>,
    work_model: Option<Box<dyn WorkModel>>,
    hierarchy: Option<Box<dyn Hierarchy>>,
    extension: Option<LevelExtension>,
    on_iteration_start: Option<StartHook<V>>,
    on_iteration_done: Option<DoneHook<V>>,
}

impl<V: SampleValue> MimcRunBuilder<V> {
    /// New builder for `config`.
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            levels: None,
            sampler: None,
            work_model: None,
            hierarchy: None,
            extension: None,
            on_iteration_start: None,
            on_iteration_done: None,
        }
    }

    /// Starting level set. Defaults to an empty [`IndexSet`] spanning the
    /// configured dimensions.
    pub fn levels(mut self, levels: impl LevelSet + 'static) -> Self {
        self.levels = Some(Box::new(levels));
        self
    }

    /// Sampler drawing every level in one call.
    pub fn sampler(mut self, sampler: impl SampleAll<V> + 'static) -> Self {
        self.sampler = Some(Box::new(sampler));
        self
    }

    /// Sampler returning raw corner values per level.
    pub fn level_sampler<S: LevelSampler<V> + 'static>(self, sampler: S) -> Self {
        self.sampler(PerSampleAll::new(sampler))
    }

    /// Sampler returning aggregated power sums per level.
    pub fn sum_sampler<S: SumSampler<V> + 'static>(self, sampler: S) -> Self {
        self.sampler(SumsSampleAll::new(sampler))
    }

    /// Work per sample model. Defaults to [`GeometricWork`] when `gamma`
    /// is configured.
    pub fn work_model(mut self, model: impl WorkModel + 'static) -> Self {
        self.work_model = Some(Box::new(model));
        self
    }

    /// Mesh hierarchy. Defaults to [`GeometricHierarchy`] when `beta` is
    /// configured.
    pub fn hierarchy(mut self, hierarchy: impl Hierarchy + 'static) -> Self {
        self.hierarchy = Some(Box::new(hierarchy));
        self
    }

    /// Level extension. Defaults to profit-driven expansion.
    pub fn extension(mut self, extension: LevelExtension) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Called at the start of every iteration.
    pub fn on_iteration_start(mut self, hook: impl FnMut(&IterationState<V>) + 'static) -> Self {
        self.on_iteration_start = Some(Box::new(hook));
        self
    }

    /// Called after an iteration that drew samples; returning `true` starts
    /// a new iteration record for the next pass.
    pub fn on_iteration_done(mut self, hook: impl FnMut(&IterationState<V>) -> bool + 'static) -> Self {
        self.on_iteration_done = Some(Box::new(hook));
        self
    }

    /// Validates the configuration and assembles the run.
    pub fn build(self) -> Result<MimcRun<V>, MimcError> {
        self.config.validate()?;
        let config = self.config;
        let sampler = self.sampler.ok_or_else(|| {
            MimcError::Config(
                ErrorInfo::new("missing-sampler", "a run needs a sampler")
                    .with_hint("call sampler, level_sampler or sum_sampler on the builder"),
            )
        })?;
        let bias_estimator = BiasEstimator::from_config(&config)?;
        let bayesian = bias_estimator.is_bayesian();
        let first = |rates: &Option<Vec<f64>>| rates.as_ref().and_then(|rates| rates.first().copied());

        let hierarchy = self.hierarchy.or_else(|| {
            first(&config.beta).map(|beta| {
                let h0inv = config.h0inv.first().copied().unwrap_or(1.0);
                Box::new(GeometricHierarchy::new(h0inv, beta)) as Box<dyn Hierarchy>
            })
        });
        if bayesian && hierarchy.is_none() {
            return Err(needs_hierarchy());
        }
        let work_model = self.work_model.or_else(|| {
            config
                .gamma
                .as_deref()
                .map(|gamma| Box::new(GeometricWork::from_rates(gamma, config.beta.as_deref())) as Box<dyn WorkModel>)
        });
        if bayesian && work_model.is_none() {
            return Err(needs_work_model());
        }
        let extension = match self.extension {
            Some(extension) => extension,
            None => default_extension(&config)?,
        };
        let min_dim = config.min_dim.max(config.dim().unwrap_or(0));
        let levels = self.levels.unwrap_or_else(|| Box::new(IndexSet::new(min_dim)));
        let confidence_factor = confidence_factor(config.confidence)?;

        let mut current = IterationState::new(config.moments);
        if bayesian {
            current.fit = Some(BayesianFit::unfitted(
                first(&config.w).unwrap_or(f64::NAN),
                first(&config.s).unwrap_or(f64::NAN),
            ));
        }
        let all_itr = (!config.reuse_samples).then(|| current.next_itr());
        debug!(bias = ?bias_estimator, confidence_factor, "MIMC run assembled");

        Ok(MimcRun {
            config,
            levels,
            sampler,
            work_model,
            hierarchy,
            extension,
            bias_estimator,
            on_iteration_start: self.on_iteration_start,
            on_iteration_done: self.on_iteration_done,
            history: Vec::new(),
            current,
            started: false,
            all_itr,
            start_level: 0,
            confidence_factor,
            phase: RunPhase::AwaitingExtension,
            exhausted: false,
        })
    }
}

fn default_extension(config: &RunConfig) -> Result<LevelExtension, MimcError> {
    let calculator = match (&config.w, &config.s, &config.gamma, &config.beta) {
        (Some(w), Some(s), Some(gamma), Some(beta)) => TotalDegreeProfit::from_rates(w, s, gamma, beta),
        _ => match config.dim().unwrap_or(config.min_dim) {
            0 => {
                return Err(MimcError::Config(
                    ErrorInfo::new("missing-extension", "cannot derive a level extension")
                        .with_hint("set w, s, gamma and beta, set min_dim, or pass an extension"),
                ))
            }
            dim => TotalDegreeProfit::uniform(dim),
        },
    };
    Ok(LevelExtension::profit(
        calculator.with_max_level(config.max_lvl),
        config.min_lvl,
    ))
}
