use std::fmt::Write as _;

use mimc_core::{ErrorInfo, LevelSet, MimcError, SampleValue};
use serde::{Deserialize, Serialize};

use crate::bayes::BayesianFit;
use crate::moments::{central_moment, PowerSums};

/// Role a level plays when per-level estimates are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LevelRole {
    /// Below the first usable level; ignored.
    Inactive,
    /// First usable level; estimated with the fine estimator.
    Base,
    /// Estimated with the difference estimator.
    Active,
}

impl LevelRole {
    /// Maps the numeric flag `-1 / 0 / 1` onto a role.
    pub fn from_flag(flag: i8) -> Self {
        match flag {
            f if f < 0 => LevelRole::Inactive,
            0 => LevelRole::Base,
            _ => LevelRole::Active,
        }
    }

    /// Numeric flag `-1 / 0 / 1`.
    pub fn flag(self) -> i8 {
        match self {
            LevelRole::Inactive => -1,
            LevelRole::Base => 0,
            LevelRole::Active => 1,
        }
    }

    /// Whether the level contributes to the estimator (base or active).
    pub fn is_used(self) -> bool {
        self != LevelRole::Inactive
    }
}

/// State of one refinement iteration: per-level counts, power sums, cost
/// and the derived diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "V: SampleValue")]
pub struct IterationState<V> {
    moments: usize,
    level_count: usize,
    counts: Vec<u64>,
    delta_sums: Option<PowerSums<V>>,
    fine_sums: Option<PowerSums<V>>,
    time: Vec<f64>,
    work: Vec<f64>,
    roles: Vec<LevelRole>,
    weights: Vec<f64>,
    /// Per-level variance estimate used for sample allocation.
    pub variance_estimate: Vec<f64>,
    /// Bias estimate.
    pub bias: f64,
    /// Statistical error estimate.
    pub stat_error: f64,
    /// Tolerance this iteration targets.
    pub tolerance: Option<f64>,
    /// Error splitting parameter used by this iteration.
    pub theta: f64,
    /// Wall-clock seconds spent in the iteration.
    pub total_time: Option<f64>,
    /// Fitted rate constants, present in Bayesian runs once fitted.
    pub fit: Option<BayesianFit>,
}

impl<V: SampleValue> IterationState<V> {
    /// Empty state tracking `moments` power sums per level.
    pub fn new(moments: usize) -> Self {
        Self {
            moments,
            level_count: 0,
            counts: Vec::new(),
            delta_sums: None,
            fine_sums: None,
            time: Vec::new(),
            work: Vec::new(),
            roles: Vec::new(),
            weights: Vec::new(),
            variance_estimate: Vec::new(),
            bias: f64::INFINITY,
            stat_error: f64::INFINITY,
            tolerance: None,
            theta: f64::NAN,
            total_time: None,
            fit: None,
        }
    }

    /// Starting state of the next iteration: every sum and diagnostic is
    /// carried over, the wall-clock total is reset.
    pub fn next_itr(&self) -> Self {
        let mut next = self.clone();
        next.total_time = None;
        next
    }

    /// Number of power sums stored per level.
    pub fn moments(&self) -> usize {
        self.moments
    }

    /// Number of levels tracked.
    pub fn level_count(&self) -> usize {
        self.level_count
    }

    /// Samples drawn per level.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Cumulative sampling time per level.
    pub fn time(&self) -> &[f64] {
        &self.time
    }

    /// Cumulative work per level.
    pub fn work(&self) -> &[f64] {
        &self.work
    }

    /// Role of each level.
    pub fn roles(&self) -> &[LevelRole] {
        &self.roles
    }

    /// Combination weight of each level.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Power sums of the difference estimator.
    pub fn delta_sums(&self) -> Option<&PowerSums<V>> {
        self.delta_sums.as_ref()
    }

    /// Power sums of the fine estimator.
    pub fn fine_sums(&self) -> Option<&PowerSums<V>> {
        self.fine_sums.as_ref()
    }

    /// Grows every per-level array to `new_count` levels. New levels start
    /// active, with weight one and no samples.
    pub fn levels_added(&mut self, new_count: usize) {
        if new_count <= self.level_count {
            return;
        }
        self.counts.resize(new_count, 0);
        self.time.resize(new_count, 0.0);
        self.work.resize(new_count, 0.0);
        self.roles.resize(new_count, LevelRole::Active);
        self.weights.resize(new_count, 1.0);
        self.variance_estimate.resize(new_count, f64::NAN);
        for sums in [&mut self.delta_sums, &mut self.fine_sums].into_iter().flatten() {
            sums.ensure_capacity(new_count);
        }
        self.level_count = new_count;
    }

    /// Replaces the level roles.
    pub fn set_roles(&mut self, roles: Vec<LevelRole>) -> Result<(), MimcError> {
        self.check_width("roles", roles.len())?;
        self.roles = roles;
        Ok(())
    }

    /// Replaces the combination weights.
    pub fn set_weights(&mut self, weights: Vec<f64>) -> Result<(), MimcError> {
        self.check_width("weights", weights.len())?;
        self.weights = weights;
        Ok(())
    }

    /// Accumulates `count` new samples at `level`.
    pub fn add_samples(
        &mut self,
        level: usize,
        count: u64,
        delta_sums: &[V],
        fine_sums: &[V],
        time: f64,
        work: f64,
    ) -> Result<(), MimcError> {
        if level >= self.level_count {
            return Err(MimcError::Levels(
                ErrorInfo::new("level-out-of-range", "samples reported for an unknown level")
                    .with_context("level", level.to_string())
                    .with_context("level_count", self.level_count.to_string()),
            ));
        }
        let (moments, levels) = (self.moments, self.level_count);
        self.delta_sums
            .get_or_insert_with(|| PowerSums::new(moments, levels))
            .accumulate(level, delta_sums)?;
        self.fine_sums
            .get_or_insert_with(|| PowerSums::new(moments, levels))
            .accumulate(level, fine_sums)?;
        self.counts[level] += count;
        self.time[level] += time;
        self.work[level] += work;
        Ok(())
    }

    /// Drops every sample while keeping levels, roles and weights.
    pub fn zero_samples(&mut self) {
        self.counts.iter_mut().for_each(|count| *count = 0);
        self.time.iter_mut().for_each(|time| *time = 0.0);
        self.work.iter_mut().for_each(|work| *work = 0.0);
        for sums in [&mut self.delta_sums, &mut self.fine_sums].into_iter().flatten() {
            sums.clear();
        }
    }

    /// Total number of samples over every level.
    pub fn total_samples(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Average work per sample, zero for levels without samples.
    pub fn calc_wl(&self) -> Vec<f64> {
        Self::per_sample(&self.work, &self.counts)
    }

    /// Average time per sample, zero for levels without samples.
    pub fn calc_tl(&self) -> Vec<f64> {
        Self::per_sample(&self.time, &self.counts)
    }

    /// Total work spent.
    pub fn total_work(&self) -> f64 {
        self.work.iter().sum()
    }

    /// Total sampling time spent.
    pub fn total_sampling_time(&self) -> f64 {
        self.time.iter().sum()
    }

    /// Central moment of the difference estimator per level.
    pub fn delta_central_moment(&self, order: usize, weighted: bool) -> Vec<Option<V>> {
        self.central(self.delta_sums.as_ref(), order, weighted)
    }

    /// Central moment of the fine estimator per level.
    pub fn fine_central_moment(&self, order: usize, weighted: bool) -> Vec<Option<V>> {
        self.central(self.fine_sums.as_ref(), order, weighted)
    }

    /// Per-level estimator: the difference moment for active levels, the
    /// fine moment for the base level, undefined for inactive levels.
    pub fn level_estimator(&self, order: usize, weighted: bool) -> Vec<Option<V>> {
        let delta = self.delta_central_moment(order, weighted);
        let fine = self.fine_central_moment(order, weighted);
        self.roles
            .iter()
            .zip(delta.into_iter().zip(fine))
            .map(|(role, (delta, fine))| match role {
                LevelRole::Inactive => None,
                LevelRole::Base => fine,
                LevelRole::Active => delta,
            })
            .collect()
    }

    /// Per-level estimator restricted to the used (base or active) levels.
    pub fn used_level_estimator(&self, order: usize, weighted: bool) -> Vec<Option<V>> {
        self.level_estimator(order, weighted)
            .into_iter()
            .zip(&self.roles)
            .filter(|(_, role)| role.is_used())
            .map(|(value, _)| value)
            .collect()
    }

    /// Per-level expectation contributions.
    pub fn calc_el(&self) -> Vec<Option<V>> {
        self.level_estimator(1, true)
    }

    /// Per-level variance of the combined estimator.
    pub fn calc_vl(&self) -> Vec<Option<V>> {
        self.level_estimator(2, true)
    }

    /// Multi-index estimate `Σ E_l` over the used levels. `None` while any
    /// used level is still undefined.
    pub fn expectation(&self) -> Option<V> {
        let mut used = self.used_level_estimator(1, true).into_iter();
        let first = used.next()??;
        used.try_fold(first, |acc, value| value.map(|value| acc.plus(&value)))
    }

    /// `bias + stat_error`.
    pub fn total_error_est(&self) -> f64 {
        self.bias + self.stat_error
    }

    /// Whether the state meets `tol`.
    pub fn satisfies(&self, tol: f64) -> bool {
        self.total_error_est() < tol
    }

    /// Fixed-width table of per-level diagnostics.
    pub fn level_table(&self, levels: &dyn LevelSet) -> String {
        let norm = |value: &Option<V>| value.as_ref().map_or(f64::NAN, SampleValue::norm);
        let el = self.calc_el();
        let vl = self.calc_vl();
        let fine_v = self.fine_central_moment(2, true);
        let delta_v = self.delta_central_moment(2, true);
        let wl = self.calc_wl();
        let tl = self.calc_tl();
        let mut table = format!(
            "{:<14}{:>12}{:>12}{:>12}{:>12}{:>12}{:>10}{:>12}\n",
            "level", "E", "V", "fine V", "delta V", "W", "M", "time"
        );
        for pos in 0..self.level_count {
            let label = levels
                .get(pos)
                .map_or_else(|| pos.to_string(), ToString::to_string);
            // Writing to a String cannot fail.
            let _ = writeln!(
                table,
                "{:<14}{:>12.4e}{:>12.4e}{:>12.4e}{:>12.4e}{:>12.4e}{:>10}{:>12.4e}",
                label,
                norm(&el[pos]),
                norm(&vl[pos]),
                norm(&fine_v[pos]),
                norm(&delta_v[pos]),
                wl[pos],
                self.counts[pos],
                tl[pos],
            );
        }
        table
    }

    fn central(&self, sums: Option<&PowerSums<V>>, order: usize, weighted: bool) -> Vec<Option<V>> {
        let Some(sums) = sums else {
            return vec![None; self.level_count];
        };
        let mut moments = central_moment(sums, &self.counts, order);
        if weighted {
            for (value, weight) in moments.iter_mut().zip(&self.weights) {
                if let Some(value) = value {
                    *value = value.scale(weight.powi(order as i32));
                }
            }
        }
        moments
    }

    fn per_sample(totals: &[f64], counts: &[u64]) -> Vec<f64> {
        totals
            .iter()
            .zip(counts)
            .map(|(&total, &count)| if count > 0 { total / count as f64 } else { 0.0 })
            .collect()
    }

    fn check_width(&self, what: &str, len: usize) -> Result<(), MimcError> {
        if len == self.level_count {
            return Ok(());
        }
        Err(MimcError::Levels(
            ErrorInfo::new("level-count-mismatch", format!("{what} must have one entry per level"))
                .with_context("expected", self.level_count.to_string())
                .with_context("received", len.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_levels_start_active_with_unit_weight() {
        let mut state = IterationState::<f64>::new(2);
        state.levels_added(3);
        assert_eq!(state.roles(), &[LevelRole::Active; 3]);
        assert_eq!(state.weights(), &[1.0; 3]);
        assert_eq!(state.counts(), &[0, 0, 0]);
        state.levels_added(2);
        assert_eq!(state.level_count(), 3);
    }

    #[test]
    fn sums_are_created_lazily_and_grow_with_levels() {
        let mut state = IterationState::<f64>::new(2);
        state.levels_added(1);
        assert!(state.delta_sums().is_none());
        state.add_samples(0, 2, &[2.0, 2.0], &[2.0, 2.0], 0.5, 1.0).unwrap();
        state.levels_added(3);
        assert_eq!(state.delta_sums().unwrap().len(), 3);
        assert_eq!(state.calc_wl(), vec![0.5, 0.0, 0.0]);
        assert_eq!(state.calc_tl(), vec![0.25, 0.0, 0.0]);
    }

    #[test]
    fn samples_for_unknown_levels_are_rejected() {
        let mut state = IterationState::<f64>::new(1);
        let err = state.add_samples(0, 1, &[1.0], &[1.0], 0.0, 0.0).unwrap_err();
        assert_eq!(err.info().code, "level-out-of-range");
    }

    #[test]
    fn zeroing_keeps_levels() {
        let mut state = IterationState::<f64>::new(1);
        state.levels_added(2);
        state.add_samples(1, 3, &[3.0], &[3.0], 1.0, 1.0).unwrap();
        state.zero_samples();
        assert_eq!(state.level_count(), 2);
        assert_eq!(state.total_samples(), 0);
        assert!(state.calc_el().iter().all(Option::is_none));
    }

    #[test]
    fn weights_scale_moments_by_their_power() {
        let mut state = IterationState::<f64>::new(2);
        state.levels_added(1);
        state.add_samples(0, 2, &[2.0, 4.0], &[2.0, 4.0], 0.0, 0.0).unwrap();
        state.set_weights(vec![3.0]).unwrap();
        assert_eq!(state.calc_el()[0], Some(3.0));
        assert_eq!(state.delta_central_moment(1, false)[0], Some(1.0));
        assert!(state.set_weights(vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn table_has_a_row_per_level() {
        let levels = mimc_set::IndexSet::linear(2);
        let mut state = IterationState::<f64>::new(2);
        state.levels_added(2);
        state.add_samples(0, 1, &[1.0, 1.0], &[1.0, 1.0], 0.1, 1.0).unwrap();
        let table = state.level_table(&levels);
        assert_eq!(table.lines().count(), 3);
        assert!(table.lines().nth(2).unwrap().starts_with("[1]"));
    }
}
