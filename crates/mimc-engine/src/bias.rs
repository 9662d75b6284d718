use mimc_core::{ErrorInfo, LevelSet, MimcError, SampleValue};
use serde::{Deserialize, Serialize};

use crate::bayes::BayesianFit;
use crate::config::{BiasConfig, RunConfig};
use crate::hierarchy::Hierarchy;
use crate::iteration::{IterationState, LevelRole};
use crate::ml2r::combination_weights;

/// Bias estimation strategy, bound to its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum BiasEstimator {
    /// Norm of the summed boundary contributions.
    Boundary,
    /// Sum of the boundary contribution norms.
    AbsBoundary,
    /// Extrapolation by the level set itself.
    SetTheoretic,
    /// Difference between the `L` and `L - 1` Richardson–Romberg windows.
    Ml2r {
        /// Leading error decay rate `w·ln β`.
        alpha: f64,
    },
    /// Fitted weak-error model.
    Bayesian,
}

impl BiasEstimator {
    /// Resolves the configured strategy.
    pub fn from_config(config: &RunConfig) -> Result<Self, MimcError> {
        Ok(match config.bias {
            BiasConfig::Bnd => BiasEstimator::Boundary,
            BiasConfig::AbsBnd => BiasEstimator::AbsBoundary,
            BiasConfig::Setutil => BiasEstimator::SetTheoretic,
            BiasConfig::Bayesian => BiasEstimator::Bayesian,
            BiasConfig::Ml2r => {
                let first = |rates: &Option<Vec<f64>>| rates.as_ref().and_then(|rates| rates.first().copied());
                match (first(&config.w), first(&config.beta)) {
                    (Some(w), Some(beta)) => BiasEstimator::Ml2r { alpha: w * beta.ln() },
                    _ => {
                        return Err(MimcError::config("ml2r-needs-rates", "ML2R bias estimation requires w and beta"))
                    }
                }
            }
        })
    }

    /// Whether this is the Bayesian strategy.
    pub fn is_bayesian(&self) -> bool {
        matches!(self, BiasEstimator::Bayesian)
    }

    /// Bias estimate of `state`. The Bayesian strategy needs the fitted
    /// model and its hierarchy.
    pub fn estimate<V: SampleValue>(
        &self,
        state: &IterationState<V>,
        levels: &dyn LevelSet,
        model: Option<(&BayesianFit, &dyn Hierarchy)>,
    ) -> Result<f64, MimcError> {
        match self {
            BiasEstimator::Boundary => Ok(boundary_bias(state, levels)),
            BiasEstimator::AbsBoundary => Ok(abs_boundary_bias(state, levels)),
            BiasEstimator::SetTheoretic => Ok(set_bias(state, levels)),
            BiasEstimator::Ml2r { alpha } => ml2r_bias(state, levels, *alpha),
            BiasEstimator::Bayesian => {
                let (fit, hierarchy) = model.ok_or_else(|| {
                    MimcError::config("bayes-needs-hierarchy", "Bayesian bias requires a fitted model and hierarchy")
                })?;
                fit.bias(hierarchy, state.level_count().saturating_sub(1))
            }
        }
    }
}

/// Norm of the sum of boundary expectations. Infinite when the base level
/// lies on the boundary or a boundary term is undefined.
pub fn boundary_bias<V: SampleValue>(state: &IterationState<V>, levels: &dyn LevelSet) -> f64 {
    let el = state.calc_el();
    let mut total: Option<V> = None;
    for pos in boundary_positions(state, levels) {
        if state.roles()[pos] == LevelRole::Base {
            return f64::INFINITY;
        }
        let Some(value) = &el[pos] else {
            return f64::INFINITY;
        };
        total = Some(match total {
            Some(acc) => acc.plus(value),
            None => value.clone(),
        });
    }
    total.map_or(0.0, |value| value.norm())
}

/// Sum of the norms of boundary expectations, with the same infinite cases
/// as [`boundary_bias`].
pub fn abs_boundary_bias<V: SampleValue>(state: &IterationState<V>, levels: &dyn LevelSet) -> f64 {
    let el = state.calc_el();
    boundary_positions(state, levels)
        .map(|pos| match (state.roles()[pos], &el[pos]) {
            (LevelRole::Active, Some(value)) => value.norm(),
            _ => f64::INFINITY,
        })
        .sum()
}

/// Level-set extrapolation over the expectation norms: base levels count as
/// infinite, inactive levels as zero.
pub fn set_bias<V: SampleValue>(state: &IterationState<V>, levels: &dyn LevelSet) -> f64 {
    let el = state.calc_el();
    let contributions: Vec<f64> = state
        .roles()
        .iter()
        .zip(&el)
        .map(|(role, value)| match (role, value) {
            (LevelRole::Inactive, _) => 0.0,
            (LevelRole::Active, Some(value)) => value.norm(),
            _ => f64::INFINITY,
        })
        .collect();
    levels.estimate_bias(&contributions)
}

/// `|Σ_ℓ (c^{L-1}_ℓ - c^L_ℓ)·E_ℓ|` over the used levels of a
/// one-dimensional set, with `c^L` the cumulative combination weights of a
/// window of `L + 1` levels.
pub fn ml2r_bias<V: SampleValue>(state: &IterationState<V>, levels: &dyn LevelSet, alpha: f64) -> Result<f64, MimcError> {
    if levels.max_dim() > 1 {
        return Err(MimcError::Config(
            ErrorInfo::new("ml2r-multi-dim", "ML2R bias estimation supports one-dimensional levels only")
                .with_context("dim", levels.max_dim().to_string()),
        ));
    }
    let el = state.level_estimator(1, false);
    let used: Vec<(u32, Option<&V>)> = (0..state.level_count())
        .filter(|&pos| state.roles()[pos].is_used())
        .map(|pos| (levels.get(pos).map_or(0, |level| level.get(0)), el[pos].as_ref()))
        .collect();
    let (Some(min), Some(max)) = (
        used.iter().map(|(ell, _)| *ell).min(),
        used.iter().map(|(ell, _)| *ell).max(),
    ) else {
        return Ok(f64::INFINITY);
    };
    let window = (max - min) as usize;
    let current = combination_weights(alpha, window);
    let previous = if window > 0 {
        combination_weights(alpha, window - 1)
    } else {
        Vec::new()
    };
    let mut total: Option<V> = None;
    for (ell, value) in used {
        let Some(value) = value else {
            return Ok(f64::INFINITY);
        };
        let k = (ell - min) as usize;
        let coefficient = previous.get(k).copied().unwrap_or(0.0) - current[k];
        let term = value.scale(coefficient);
        total = Some(match total {
            Some(acc) => acc.plus(&term),
            None => term,
        });
    }
    Ok(total.map_or(f64::INFINITY, |value| value.norm()))
}

fn boundary_positions<'a, V: SampleValue>(
    state: &'a IterationState<V>,
    levels: &dyn LevelSet,
) -> impl Iterator<Item = usize> + 'a {
    let boundary = levels.is_boundary();
    (0..state.level_count()).filter(move |&pos| boundary.get(pos).copied().unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimc_set::IndexSet;

    /// Three one-dimensional levels with mean contributions 1, 0.5, 0.25.
    fn state() -> (IterationState<f64>, IndexSet) {
        let mut state = IterationState::new(2);
        state.levels_added(3);
        for (level, mean) in [1.0, 0.5, 0.25].into_iter().enumerate() {
            state.add_samples(level, 2, &[2.0 * mean, 2.0 * mean * mean], &[2.0, 2.0], 0.0, 2.0).unwrap();
        }
        state
            .set_roles(vec![LevelRole::Base, LevelRole::Active, LevelRole::Active])
            .unwrap();
        (state, IndexSet::linear(3))
    }

    #[test]
    fn boundary_strategies_use_the_finest_level() {
        let (state, levels) = state();
        assert_eq!(boundary_bias(&state, &levels), 0.25);
        assert_eq!(abs_boundary_bias(&state, &levels), 0.25);
    }

    #[test]
    fn base_level_on_the_boundary_cannot_certify() {
        let mut state = IterationState::<f64>::new(1);
        state.levels_added(1);
        state.add_samples(0, 1, &[1.0], &[1.0], 0.0, 1.0).unwrap();
        state.set_roles(vec![LevelRole::Base]).unwrap();
        let levels = IndexSet::linear(1);
        assert!(boundary_bias(&state, &levels).is_infinite());
        assert!(abs_boundary_bias(&state, &levels).is_infinite());
        assert!(set_bias(&state, &levels).is_infinite());
    }

    #[test]
    fn undefined_boundary_term_is_infinite() {
        let (mut state, levels) = state();
        state.levels_added(4);
        let mut levels = levels;
        levels.add_from_list(&[mimc_core::MultiIndex::level(3)]).unwrap();
        assert!(boundary_bias(&state, &levels).is_infinite());
    }

    #[test]
    fn set_bias_extrapolates_the_decay() {
        let (state, levels) = state();
        // 0.25 * min(1, 0.25 / 0.5)
        assert!((set_bias(&state, &levels) - 0.125).abs() < 1e-12);
    }

    #[test]
    fn ml2r_single_level_is_its_expectation() {
        let mut state = IterationState::<f64>::new(1);
        state.levels_added(1);
        state.add_samples(0, 2, &[3.0], &[3.0], 0.0, 1.0).unwrap();
        let levels = IndexSet::linear(1);
        let bias = ml2r_bias(&state, &levels, 1.0).unwrap();
        assert!((bias - 1.5).abs() < 1e-12);
    }

    #[test]
    fn ml2r_rejects_multi_dimensional_sets() {
        let (state, _) = state();
        let levels = IndexSet::from_indices(
            0,
            &[
                mimc_core::MultiIndex::seed(),
                mimc_core::MultiIndex::level(1),
                mimc_core::MultiIndex::new(vec![0, 1]),
            ],
        )
        .unwrap();
        let err = ml2r_bias(&state, &levels, 1.0).unwrap_err();
        assert_eq!(err.info().code, "ml2r-multi-dim");
    }

    #[test]
    fn ml2r_needs_rates() {
        let mut config = RunConfig::with_tol(0.1);
        config.bias = BiasConfig::Ml2r;
        assert!(BiasEstimator::from_config(&config).is_err());
        config.w = Some(vec![1.0]);
        config.beta = Some(vec![2.0]);
        let estimator = BiasEstimator::from_config(&config).unwrap();
        assert_eq!(estimator, BiasEstimator::Ml2r { alpha: 2f64.ln() });
    }
}
