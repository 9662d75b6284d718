use std::time::Instant;

use mimc_core::{ErrorInfo, LevelStreams, MimcError, MultiIndex, RngHandle};
use mimc_engine::{LevelSampler, RunConfig, SampleDraw};
use rand::distributions::Distribution;
use serde::{Deserialize, Serialize};
use statrs::distribution::Normal;

/// Built-in quantities of interest with known limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Problem {
    /// `1 + h(ℓ)^w` with `h(ℓ) = β^{-ℓ}`, evaluated exactly.
    Geometric {
        /// Weak rate.
        #[serde(default = "default_rate")]
        w: f64,
        /// Refinement factor.
        #[serde(default = "default_beta")]
        beta: f64,
    },
    /// `1 + h^w + spread·ξ₀ + h^{s/2}·ξ` with standard normal `ξ₀, ξ` shared
    /// across the corners of a sample.
    NoisyGeometric {
        /// Weak rate.
        #[serde(default = "default_rate")]
        w: f64,
        /// Strong rate; difference variances decay as `h^s`.
        #[serde(default = "default_strong")]
        s: f64,
        /// Refinement factor.
        #[serde(default = "default_beta")]
        beta: f64,
        /// Standard deviation of the level-independent noise.
        #[serde(default = "default_spread")]
        spread: f64,
    },
    /// `S(T)` of a geometric Brownian motion under Euler–Maruyama with
    /// `steps·2^ℓ` steps, coupled across levels through shared increments.
    Gbm {
        /// Drift.
        #[serde(default = "default_mu")]
        mu: f64,
        /// Volatility.
        #[serde(default = "default_sigma")]
        sigma: f64,
        /// Initial value.
        #[serde(default = "default_one")]
        s0: f64,
        /// Final time.
        #[serde(default = "default_one")]
        horizon: f64,
        /// Steps at level zero.
        #[serde(default = "default_steps")]
        steps: u32,
    },
    /// `1 + (Σ_d h_d^{w_d})·(1 + ξ/2)`, a multi-index problem whose mixed
    /// differences vanish.
    Separable {
        /// Weak rate per dimension.
        #[serde(default = "default_separable_rates")]
        w: Vec<f64>,
        /// Refinement factor shared by every dimension.
        #[serde(default = "default_beta")]
        beta: f64,
    },
}

fn default_rate() -> f64 {
    1.0
}

fn default_strong() -> f64 {
    2.0
}

fn default_beta() -> f64 {
    2.0
}

fn default_spread() -> f64 {
    0.5
}

fn default_mu() -> f64 {
    0.05
}

fn default_sigma() -> f64 {
    0.2
}

fn default_one() -> f64 {
    1.0
}

fn default_steps() -> u32 {
    4
}

fn default_separable_rates() -> Vec<f64> {
    vec![1.0, 2.0]
}

impl Problem {
    /// Kebab-case name of the problem.
    pub fn name(&self) -> &'static str {
        match self {
            Problem::Geometric { .. } => "geometric",
            Problem::NoisyGeometric { .. } => "noisy-geometric",
            Problem::Gbm { .. } => "gbm",
            Problem::Separable { .. } => "separable",
        }
    }

    /// Limit of the quantity of interest as every level grows.
    pub fn exact(&self) -> f64 {
        match self {
            Problem::Gbm { mu, s0, horizon, .. } => s0 * (mu * horizon).exp(),
            _ => 1.0,
        }
    }

    fn stream(&self) -> u64 {
        match self {
            Problem::Geometric { .. } => 0,
            Problem::NoisyGeometric { .. } => 1,
            Problem::Gbm { .. } => 2,
            Problem::Separable { .. } => 3,
        }
    }

    /// Number of level dimensions.
    pub fn dim(&self) -> usize {
        match self {
            Problem::Separable { w, .. } => w.len(),
            _ => 1,
        }
    }

    /// Fills the rate vectors the configuration leaves unset with the
    /// problem's known rates.
    pub fn fill_rates(&self, config: &mut RunConfig) {
        let dim = self.dim();
        let (w, s, beta) = match self {
            Problem::Geometric { w, beta } => (vec![*w], vec![2.0 * w], *beta),
            Problem::NoisyGeometric { w, s, beta, .. } => (vec![*w], vec![*s], *beta),
            Problem::Gbm { .. } => (vec![1.0], vec![1.0], 2.0),
            Problem::Separable { w, beta } => (w.clone(), w.iter().map(|w| 2.0 * w).collect(), *beta),
        };
        config.w.get_or_insert(w);
        config.s.get_or_insert(s);
        config.gamma.get_or_insert_with(|| vec![1.0; dim]);
        config.beta.get_or_insert_with(|| vec![beta; dim]);
    }

    /// Seeded sampler for this problem. Each problem kind draws from its own
    /// substream of `seed`, split further into one stream per level.
    pub fn sampler(&self, seed: u64) -> Result<ProblemSampler, MimcError> {
        let normal = Normal::new(0.0, 1.0)
            .map_err(|err| MimcError::Numeric(ErrorInfo::new("normal-distribution", err.to_string())))?;
        Ok(ProblemSampler {
            problem: self.clone(),
            streams: LevelStreams::new(RngHandle::from_seed(seed).substream(self.stream())),
            normal,
        })
    }
}

/// Draws coupled corner values of a [`Problem`].
#[derive(Debug, Clone)]
pub struct ProblemSampler {
    problem: Problem,
    streams: LevelStreams,
    normal: Normal,
}

/// One coupled sample at every corner. `corners[0]` is the finest.
fn draw(
    problem: &Problem,
    normal: &Normal,
    rng: &mut RngHandle,
    corners: &[MultiIndex],
) -> Result<Vec<f64>, MimcError> {
    Ok(match problem {
        Problem::Geometric { w, beta } => corners
            .iter()
            .map(|corner| 1.0 + mesh(*beta, corner.get(0)).powf(*w))
            .collect(),
        Problem::NoisyGeometric { w, s, beta, spread } => {
            let base = normal.sample(rng);
            let fluctuation = normal.sample(rng);
            corners
                .iter()
                .map(|corner| {
                    let h = mesh(*beta, corner.get(0));
                    1.0 + h.powf(*w) + spread * base + h.powf(s / 2.0) * fluctuation
                })
                .collect()
        }
        Problem::Gbm {
            mu,
            sigma,
            s0,
            horizon,
            steps,
        } => {
            let finest = corners.iter().map(|corner| corner.get(0)).max().unwrap_or(0);
            let fine_steps = 1usize
                .checked_shl(finest)
                .and_then(|scale| (*steps as usize).checked_mul(scale))
                .ok_or_else(|| {
                    MimcError::Sampling(
                        ErrorInfo::new("time-steps-overflow", "too many Euler steps at this level")
                            .with_context("level", finest.to_string())
                            .with_context("steps", steps.to_string()),
                    )
                })?;
            let dt = horizon / fine_steps as f64;
            let increments: Vec<f64> = (0..fine_steps)
                .map(|_| normal.sample(rng) * dt.sqrt())
                .collect();
            corners
                .iter()
                .map(|corner| {
                    let stride = 1usize << (finest - corner.get(0));
                    let coarse_dt = dt * stride as f64;
                    increments.chunks(stride).fold(*s0, |value, chunk| {
                        let dw: f64 = chunk.iter().sum();
                        value + mu * value * coarse_dt + sigma * value * dw
                    })
                })
                .collect()
        }
        Problem::Separable { w, beta } => {
            let factor = 1.0 + 0.5 * normal.sample(rng);
            corners
                .iter()
                .map(|corner| {
                    let decay: f64 = w
                        .iter()
                        .enumerate()
                        .map(|(d, rate)| mesh(*beta, corner.get(d)).powf(*rate))
                        .sum();
                    1.0 + decay * factor
                })
                .collect()
        }
    })
}

impl LevelSampler<f64> for ProblemSampler {
    fn sample(&mut self, corners: &[MultiIndex], count: u64) -> Result<SampleDraw<f64>, MimcError> {
        let clock = Instant::now();
        let level = corners.first().cloned().unwrap_or_default();
        let rng = self.streams.level(&level);
        let values = (0..count)
            .map(|_| draw(&self.problem, &self.normal, rng, corners))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SampleDraw {
            values,
            time: clock.elapsed().as_secs_f64(),
            work: None,
        })
    }
}

fn mesh(beta: f64, level: u32) -> f64 {
    beta.powf(-f64::from(level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometric_corners_follow_the_mesh() {
        let problem = Problem::Geometric { w: 1.0, beta: 2.0 };
        let mut sampler = problem.sampler(0).unwrap();
        let draw = sampler.sample(&[MultiIndex::level(2), MultiIndex::level(1)], 3).unwrap();
        assert_eq!(draw.values.len(), 3);
        assert_eq!(draw.values[0], vec![1.25, 1.5]);
    }

    #[test]
    fn gbm_levels_share_their_brownian_path() {
        let problem = Problem::Gbm {
            mu: 0.0,
            sigma: 0.0,
            s0: 2.0,
            horizon: 1.0,
            steps: 2,
        };
        let mut sampler = problem.sampler(1).unwrap();
        let draw = sampler.sample(&[MultiIndex::level(3), MultiIndex::level(2)], 1).unwrap();
        assert_eq!(draw.values[0], vec![2.0, 2.0]);
        assert_eq!(problem.exact(), 2.0);
    }

    #[test]
    fn gbm_coarse_and_fine_paths_stay_close() {
        let problem = Problem::Gbm {
            mu: 0.05,
            sigma: 0.2,
            s0: 1.0,
            horizon: 1.0,
            steps: 4,
        };
        let mut sampler = problem.sampler(9).unwrap();
        let draw = sampler.sample(&[MultiIndex::level(6), MultiIndex::level(5)], 50).unwrap();
        for row in &draw.values {
            assert!((row[0] - row[1]).abs() < 0.05);
        }
    }

    #[test]
    fn rates_fill_only_missing_fields() {
        let mut config = RunConfig::with_tol(0.1);
        config.gamma = Some(vec![2.0, 2.0]);
        Problem::Separable {
            w: vec![1.0, 0.5],
            beta: 2.0,
        }
        .fill_rates(&mut config);
        assert_eq!(config.w, Some(vec![1.0, 0.5]));
        assert_eq!(config.s, Some(vec![2.0, 1.0]));
        assert_eq!(config.gamma, Some(vec![2.0, 2.0]));
        assert_eq!(config.beta, Some(vec![2.0, 2.0]));
    }

    #[test]
    fn separable_mixed_differences_vanish() {
        let problem = Problem::Separable {
            w: vec![1.0, 1.0],
            beta: 2.0,
        };
        let mut sampler = problem.sampler(4).unwrap();
        let corners = square_corners();
        let draw = sampler.sample(&corners, 1).unwrap();
        let row = &draw.values[0];
        let mixed = row[0] - row[1] - row[2] + row[3];
        assert!(mixed.abs() < 1e-12);
    }

    #[test]
    fn level_draws_do_not_depend_on_visiting_order() {
        let problem = Problem::NoisyGeometric {
            w: 1.0,
            s: 2.0,
            beta: 2.0,
            spread: 0.5,
        };
        let fine = [MultiIndex::level(2), MultiIndex::level(1)];
        let coarse = [MultiIndex::level(1), MultiIndex::seed()];

        let mut warmed = problem.sampler(11).unwrap();
        warmed.sample(&fine, 7).unwrap();
        let after_fine = warmed.sample(&coarse, 3).unwrap();

        let mut fresh = problem.sampler(11).unwrap();
        let alone = fresh.sample(&coarse, 3).unwrap();
        assert_eq!(after_fine.values, alone.values);
    }

    #[test]
    fn gbm_rejects_levels_with_too_many_steps() {
        let problem = Problem::Gbm {
            mu: 0.05,
            sigma: 0.2,
            s0: 1.0,
            horizon: 1.0,
            steps: 4,
        };
        let mut sampler = problem.sampler(3).unwrap();
        for ell in [62, 70] {
            let err = sampler.sample(&[MultiIndex::level(ell)], 1).unwrap_err();
            assert_eq!(err.info().code, "time-steps-overflow");
        }
    }

    fn square_corners() -> Vec<MultiIndex> {
        vec![
            MultiIndex::new(vec![1, 1]),
            MultiIndex::new(vec![0, 1]),
            MultiIndex::new(vec![1, 0]),
            MultiIndex::seed(),
        ]
    }
}
