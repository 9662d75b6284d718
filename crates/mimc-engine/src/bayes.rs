use mimc_core::{ErrorInfo, MimcError, SampleValue};
use serde::{Deserialize, Serialize};

use crate::config::BayesConfig;
use crate::hierarchy::Hierarchy;
use crate::iteration::{IterationState, LevelRole};
use crate::moments::norms;

/// Convergence-rate model `E_l ≈ W·(h_{l-1}^w - h_l^w)`,
/// `V_l ≈ S·(h_{l-1}^{s/2} - h_l^{s/2})^2` with fixed exponents and fitted
/// constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BayesianFit {
    /// Weak-error constant `W`.
    pub weak_constant: f64,
    /// Variance constant `S`.
    pub variance_constant: f64,
    /// Weak rate `w`.
    pub weak_rate: f64,
    /// Strong rate `s`.
    pub strong_rate: f64,
}

impl BayesianFit {
    /// Model with known exponents and constants not yet fitted.
    pub fn unfitted(weak_rate: f64, strong_rate: f64) -> Self {
        Self {
            weak_constant: f64::INFINITY,
            variance_constant: f64::INFINITY,
            weak_rate,
            strong_rate,
        }
    }

    /// Bias of an estimator truncated at level `max_level`: `W·h(L)^w`.
    pub fn bias(&self, hierarchy: &dyn Hierarchy, max_level: usize) -> Result<f64, MimcError> {
        if max_level <= 1 {
            return Err(insufficient_levels(max_level + 1));
        }
        Ok(self.weak_constant * hierarchy.mesh_size(max_level as u32).powf(self.weak_rate))
    }

    /// Weighted least-squares fit of `W` and `S` from the first two delta
    /// power sums of the last `fit_levels` sampled levels (level 0 excluded).
    pub fn fit<V: SampleValue>(
        &mut self,
        all: &IterationState<V>,
        hierarchy: &dyn Hierarchy,
        fit_levels: usize,
    ) -> Result<(), MimcError> {
        if all.total_samples() == 0 {
            return Ok(());
        }
        let count = all.level_count();
        let max_level = count.saturating_sub(1);
        if max_level <= 1 {
            return Err(insufficient_levels(count));
        }
        let first = max_level.saturating_sub(fit_levels).max(1);
        let rows = sampled_rows(all, first..count)?;
        if rows.len() < 2 {
            return Err(insufficient_levels(rows.len()));
        }
        let hl = hierarchy.mesh_sizes(max_level);
        let (t1, t2): (Vec<f64>, Vec<f64>) = rows
            .iter()
            .map(|row| (self.weak_term(&hl, row.level), self.strong_term(&hl, row.level)))
            .unzip();

        let numerator = sum_values(rows.iter().enumerate().map(|(i, row)| row.s1.scale(t1[i] * t2[i])));
        let denominator: f64 = rows.iter().enumerate().map(|(i, row)| row.m * t1[i].powi(2) * t2[i]).sum();
        let weak = numerator.map_or(f64::NAN, |value| value.norm()) / denominator;

        let spread: f64 = rows
            .iter()
            .enumerate()
            .map(|(i, row)| row.s2.scale(t2[i]).norm() - row.s1.scale(2.0 * weak * t1[i] * t2[i]).norm())
            .sum();
        let model: f64 = rows
            .iter()
            .enumerate()
            .map(|(i, row)| row.m * weak.powi(2) * t1[i].powi(2) * t2[i])
            .sum();
        let samples: f64 = rows.iter().map(|row| row.m).sum();

        self.weak_constant = weak;
        self.variance_constant = (spread + model) / samples;
        Ok(())
    }

    /// Posterior per-level variance for a hierarchy truncated at
    /// `max_level` (default: the current deepest level). Levels beyond the
    /// sampled ones are predicted from the model alone.
    pub fn variance_estimate<V: SampleValue>(
        &self,
        all: &IterationState<V>,
        hierarchy: &dyn Hierarchy,
        priors: &BayesConfig,
        max_level: Option<usize>,
    ) -> Result<Vec<f64>, MimcError> {
        if all.total_samples() == 0 {
            return Ok(norms(all.calc_vl()));
        }
        let count = all.level_count();
        let max_level = max_level.unwrap_or(count.saturating_sub(1));
        if max_level <= 1 {
            return Err(insufficient_levels(max_level + 1));
        }
        let hl = hierarchy.mesh_sizes(max_level);
        let counts = all.counts();
        let g3: Vec<f64> = (0..max_level)
            .map(|j| {
                let lambda = self.strong_term(&hl, j + 1) / self.variance_constant;
                let m = counts.get(j + 1).copied().unwrap_or(0) as f64;
                priors.k1 * lambda + m / 2.0
            })
            .collect();
        let mut g4 = vec![priors.k1; max_level];

        let el = all.calc_el();
        for row in sampled_rows(all, 1..count.min(max_level + 1))? {
            let Some(m1) = el[row.level].as_ref() else {
                continue;
            };
            let mu = self.weak_constant * self.weak_term(&hl, row.level);
            let centred = row.s2.minus(&row.s1.times(m1)).norm();
            let shrink = row.m * priors.k0 * (m1.norm() - mu).powi(2) / (priors.k0 + row.m);
            g4[row.level - 1] += 0.5 * (centred + shrink);
        }

        let fine = norms(all.fine_central_moment(2, true));
        let mut variance = vec![f64::NAN; max_level + 1];
        variance[0] = fine.first().copied().unwrap_or(f64::NAN);
        for j in 0..max_level {
            variance[j + 1] = g4[j] / g3[j];
        }
        for (level, role) in all.roles().iter().enumerate().take(max_level + 1) {
            match role {
                LevelRole::Base => variance[level] = fine[level],
                LevelRole::Inactive => variance[level] = f64::NAN,
                LevelRole::Active => {}
            }
        }
        Ok(variance)
    }

    /// `h_{l-1}^w - h_l^w`.
    fn weak_term(&self, hl: &[f64], level: usize) -> f64 {
        hl[level - 1].powf(self.weak_rate) - hl[level].powf(self.weak_rate)
    }

    /// `(h_{l-1}^{s/2} - h_l^{s/2})^{-2}`.
    fn strong_term(&self, hl: &[f64], level: usize) -> f64 {
        let half = self.strong_rate / 2.0;
        (hl[level - 1].powf(half) - hl[level].powf(half)).powi(-2)
    }
}

struct SampledRow<V> {
    level: usize,
    m: f64,
    s1: V,
    s2: V,
}

fn sampled_rows<V: SampleValue>(
    all: &IterationState<V>,
    levels: std::ops::Range<usize>,
) -> Result<Vec<SampledRow<V>>, MimcError> {
    let Some(sums) = all.delta_sums() else {
        return Ok(Vec::new());
    };
    let mut rows = Vec::new();
    for level in levels {
        let m = all.counts()[level];
        let Some(row) = sums.row(level).filter(|_| m > 0) else {
            continue;
        };
        if row.len() < 2 {
            return Err(MimcError::Fit(
                ErrorInfo::new("bayes-needs-variance", "fitting requires at least two power sums")
                    .with_hint("set moments >= 2"),
            ));
        }
        rows.push(SampledRow {
            level,
            m: m as f64,
            s1: row[0].clone(),
            s2: row[1].clone(),
        });
    }
    Ok(rows)
}

fn sum_values<V: SampleValue>(values: impl Iterator<Item = V>) -> Option<V> {
    values.reduce(|acc, value| acc.plus(&value))
}

fn insufficient_levels(levels: usize) -> MimcError {
    MimcError::Fit(
        ErrorInfo::new("insufficient-levels", "Bayesian fitting needs at least two sampled levels beyond the first")
            .with_context("levels", levels.to_string()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::GeometricHierarchy;

    const W: f64 = 3.0;
    const S: f64 = 0.5;

    /// Exact sums for `E_l = W (h_{l-1} - h_l)`, `V_l = S (h_{l-1} - h_l)^2`
    /// with `h_l = 2^-l`, `w = 1`, `s = 2`.
    fn model_state(levels: usize, samples: u64) -> IterationState<f64> {
        let hierarchy = GeometricHierarchy::new(1.0, 2.0);
        let mut state = IterationState::new(2);
        state.levels_added(levels);
        let m = samples as f64;
        state.add_samples(0, samples, &[m, 2.0 * m], &[m, 2.0 * m], 0.0, m).unwrap();
        for level in 1..levels {
            let gap = hierarchy.mesh_size(level as u32 - 1) - hierarchy.mesh_size(level as u32);
            let mean = W * gap;
            let variance = S * gap * gap;
            let sums = [m * mean, m * (mean * mean + variance)];
            state.add_samples(level, samples, &sums, &sums, 0.0, m).unwrap();
        }
        let mut roles = vec![LevelRole::Active; levels];
        roles[0] = LevelRole::Base;
        state.set_roles(roles).unwrap();
        state
    }

    #[test]
    fn fit_recovers_model_constants() {
        let state = model_state(5, 40);
        let mut fit = BayesianFit::unfitted(1.0, 2.0);
        fit.fit(&state, &GeometricHierarchy::new(1.0, 2.0), 1000).unwrap();
        assert!((fit.weak_constant - W).abs() < 1e-9);
        assert!((fit.variance_constant - S).abs() < 1e-9);
        let bias = fit.bias(&GeometricHierarchy::new(1.0, 2.0), 4).unwrap();
        assert!((bias - W / 16.0).abs() < 1e-9);
    }

    #[test]
    fn two_levels_are_not_enough() {
        let state = model_state(2, 10);
        let mut fit = BayesianFit::unfitted(1.0, 2.0);
        let err = fit.fit(&state, &GeometricHierarchy::new(1.0, 2.0), 1000).unwrap_err();
        assert_eq!(err.info().code, "insufficient-levels");
        assert!(fit.bias(&GeometricHierarchy::new(1.0, 2.0), 1).is_err());
    }

    #[test]
    fn variance_extends_beyond_sampled_levels() {
        let hierarchy = GeometricHierarchy::new(1.0, 2.0);
        let state = model_state(4, 1000);
        let mut fit = BayesianFit::unfitted(1.0, 2.0);
        fit.fit(&state, &hierarchy, 1000).unwrap();
        let priors = BayesConfig::default();
        let variance = fit.variance_estimate(&state, &hierarchy, &priors, Some(5)).unwrap();
        assert_eq!(variance.len(), 6);
        assert!((variance[0] - 1.0).abs() < 1e-9);
        for level in 1..4 {
            let gap = hierarchy.mesh_size(level as u32 - 1) - hierarchy.mesh_size(level as u32);
            let expected = S * gap * gap;
            assert!((variance[level] - expected).abs() / expected < 0.05);
        }
        // Unsampled levels fall back to the prior, which follows the model.
        let gap = hierarchy.mesh_size(4) - hierarchy.mesh_size(5);
        assert!((variance[5] - S * gap * gap).abs() / (S * gap * gap) < 1e-9);
    }
}
