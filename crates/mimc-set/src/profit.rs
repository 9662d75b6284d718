use mimc_core::{MultiIndex, ProfitCalculator};
use serde::{Deserialize, Serialize};

/// Total-degree profit: `log_profit(i) = sum_d weight_d * i_d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TotalDegreeProfit {
    /// Per-dimension weights; their count fixes the usable dimensions.
    pub weights: Vec<f64>,
    /// Optional cap on every coordinate. Candidates above it are never added.
    #[serde(default)]
    pub max_level: Option<u32>,
}

impl TotalDegreeProfit {
    /// Creates a calculator from explicit weights.
    pub fn new(weights: Vec<f64>) -> Self {
        Self {
            weights,
            max_level: None,
        }
    }

    /// Equal weights `1/dim` in every dimension.
    pub fn uniform(dim: usize) -> Self {
        let dim = dim.max(1);
        Self::new(vec![1.0 / dim as f64; dim])
    }

    /// Weights `ln(beta) * (w + (gamma - s) / 2)` normalised to sum to one,
    /// which orders levels by their work-to-error contribution.
    pub fn from_rates(w: &[f64], s: &[f64], gamma: &[f64], beta: &[f64]) -> Self {
        let raw: Vec<f64> = w
            .iter()
            .zip(s)
            .zip(gamma)
            .zip(beta)
            .map(|(((w, s), gamma), beta)| beta.ln() * (w + (gamma - s) / 2.0))
            .collect();
        let total: f64 = raw.iter().sum();
        Self::new(raw.into_iter().map(|value| value / total).collect())
    }

    /// Caps every coordinate at `max_level`.
    pub fn with_max_level(mut self, max_level: Option<u32>) -> Self {
        self.max_level = max_level;
        self
    }
}

impl ProfitCalculator for TotalDegreeProfit {
    fn log_profit(&self, index: &MultiIndex) -> f64 {
        if index.dim() > self.weights.len() {
            return f64::INFINITY;
        }
        if let Some(cap) = self.max_level {
            if index.as_slice().iter().any(|&value| value > cap) {
                return f64::INFINITY;
            }
        }
        index
            .as_slice()
            .iter()
            .zip(&self.weights)
            .map(|(&value, weight)| value as f64 * weight)
            .sum()
    }

    fn max_dim(&self) -> usize {
        self.weights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_weights_are_normalised() {
        let profit = TotalDegreeProfit::from_rates(&[1.0, 1.0], &[2.0, 2.0], &[2.0, 1.0], &[2.0, 2.0]);
        let total: f64 = profit.weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(profit.weights[0] > profit.weights[1]);
    }

    #[test]
    fn capped_levels_have_infinite_profit() {
        let profit = TotalDegreeProfit::uniform(1).with_max_level(Some(2));
        assert_eq!(profit.log_profit(&MultiIndex::level(2)), 2.0);
        assert!(profit.log_profit(&MultiIndex::level(3)).is_infinite());
        assert!(profit.log_profit(&MultiIndex::new(vec![0, 1])).is_infinite());
    }
}
