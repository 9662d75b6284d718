//! Discretisation hierarchies, work models and tolerance schedules.

use mimc_core::{ErrorInfo, MimcError, MultiIndex};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Maps a one-dimensional level onto its mesh size `h(ℓ)`.
pub trait Hierarchy {
    /// Mesh size of level `ell`.
    fn mesh_size(&self, ell: u32) -> f64;

    /// Mesh sizes of levels `0..=max_level`.
    fn mesh_sizes(&self, max_level: usize) -> Vec<f64> {
        (0..=max_level as u32).map(|ell| self.mesh_size(ell)).collect()
    }
}

impl<F> Hierarchy for F
where
    F: Fn(u32) -> f64,
{
    fn mesh_size(&self, ell: u32) -> f64 {
        self(ell)
    }
}

/// `h(ℓ) = β^{-ℓ} / h0inv`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometricHierarchy {
    /// Inverse of the coarsest mesh size.
    pub h0inv: f64,
    /// Refinement factor between consecutive levels.
    pub beta: f64,
}

impl GeometricHierarchy {
    /// Creates the hierarchy.
    pub fn new(h0inv: f64, beta: f64) -> Self {
        Self { h0inv, beta }
    }
}

impl Hierarchy for GeometricHierarchy {
    fn mesh_size(&self, ell: u32) -> f64 {
        self.beta.powf(-f64::from(ell)) / self.h0inv
    }
}

/// Cost of one sample at each of a list of levels.
pub trait WorkModel {
    /// Work per sample, one entry per level.
    fn work(&self, levels: &[MultiIndex]) -> Vec<f64>;
}

impl<F> WorkModel for F
where
    F: Fn(&[MultiIndex]) -> Vec<f64>,
{
    fn work(&self, levels: &[MultiIndex]) -> Vec<f64> {
        self(levels)
    }
}

/// Work `Π_d exp(ℓ_d · exponent_d)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometricWork {
    /// Per-dimension exponents.
    pub exponents: Vec<f64>,
}

impl GeometricWork {
    /// Uses the exponents as given.
    pub fn new(exponents: Vec<f64>) -> Self {
        Self { exponents }
    }

    /// Exponents `γ_d · ln β_d`, so work grows as `β^{γℓ}`. Without `beta`
    /// the rates are used directly.
    pub fn from_rates(gamma: &[f64], beta: Option<&[f64]>) -> Self {
        let exponents = match beta {
            Some(beta) => gamma.iter().zip(beta).map(|(g, b)| g * b.ln()).collect(),
            None => gamma.to_vec(),
        };
        Self::new(exponents)
    }
}

impl WorkModel for GeometricWork {
    fn work(&self, levels: &[MultiIndex]) -> Vec<f64> {
        levels
            .iter()
            .map(|level| {
                self.exponents
                    .iter()
                    .enumerate()
                    .map(|(d, exponent)| (f64::from(level.get(d)) * exponent).exp())
                    .product()
            })
            .collect()
    }
}

/// Decreasing tolerance schedule: `TOL·r1^k` for `k = K..=0` where
/// `K = ⌊ln(max_tol/TOL) / ln r1⌋`, then `TOL·r2^{-k}` for
/// `k = 1..=max_additional`.
pub fn tol_sequence(tol: f64, max_tol: f64, max_additional: usize, r1: f64, r2: f64) -> Vec<f64> {
    let steps = (-(tol.ln() - max_tol.ln()) / r1.ln()).floor().max(0.0) as i32;
    (0..=steps)
        .rev()
        .map(|k| tol * r1.powi(k))
        .chain((1..=max_additional as i32).map(|k| tol * r2.powi(-k)))
        .collect()
}

/// Asymptotic complexity `TOL^{rate} · |log TOL|^{log_rate}` of a MIMC
/// estimator with the given weak, strong and work rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComplexityRate {
    /// Exponent of the tolerance.
    pub rate: f64,
    /// Exponent of the logarithmic factor; `None` outside the classified
    /// regimes.
    pub log_rate: Option<f64>,
}

/// Classifies the complexity of a MIMC estimator.
pub fn complexity_rate(w: &[f64], s: &[f64], gamma: &[f64]) -> Result<ComplexityRate, MimcError> {
    let d = w.len();
    if s.len() != d || gamma.len() != d || d == 0 {
        return Err(MimcError::Config(
            ErrorInfo::new("dimension-mismatch", "w, s and gamma must have the same non-zero length")
                .with_context("w", d.to_string())
                .with_context("s", s.len().to_string())
                .with_context("gamma", gamma.len().to_string()),
        ));
    }
    let delta: Vec<f64> = (0..d).map(|i| (gamma[i] - s[i]) / (2.0 * w[i])).collect();
    let zeta = delta.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let xi = (0..d)
        .map(|i| (2.0 * w[i] - s[i]) / gamma[i])
        .fold(f64::INFINITY, f64::min);
    let d2 = delta.iter().filter(|&&value| value == 0.0).count() as f64;
    let dz = delta.iter().filter(|&&value| value == zeta).count() as f64;
    let dims = d as f64;
    let rate = -2.0 * (1.0 + zeta.max(0.0));
    let log_rate = if (zeta <= 0.0 && zeta < xi) || (zeta == xi && zeta == 0.0 && d <= 2) {
        Some(2.0 * d2)
    } else if zeta > 0.0 && xi > 0.0 {
        Some(2.0 * (dz - 1.0) * (zeta + 1.0))
    } else if zeta == 0.0 && xi == 0.0 && d > 2 {
        Some(2.0 * d2 + dims - 3.0)
    } else if zeta > 0.0 && xi == 0.0 {
        Some(dims - 1.0 + 2.0 * (dz - 1.0) * (1.0 + zeta))
    } else {
        None
    };
    Ok(ComplexityRate { rate, log_rate })
}

/// Two-sided standard normal quantile for `confidence`, e.g. 1.96 for 0.95.
pub fn confidence_factor(confidence: f64) -> Result<f64, MimcError> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(MimcError::Config(
            ErrorInfo::new("invalid-confidence", "confidence must lie in (0, 1)")
                .with_context("confidence", confidence.to_string()),
        ));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|err| MimcError::Numeric(ErrorInfo::new("normal-distribution", err.to_string())))?;
    Ok(normal.inverse_cdf((1.0 + confidence) / 2.0))
}
