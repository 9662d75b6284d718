//! Contracts for the level set and its expansion policy.

use std::fmt;

use crate::errors::MimcError;
use crate::index::MultiIndex;

/// Ordered collection of multi-index levels.
///
/// Positions are stable: a level keeps the position it was inserted at, and
/// the engine addresses every per-level quantity by that position.
pub trait LevelSet: fmt::Debug {
    /// Number of levels in the set.
    fn len(&self) -> usize;

    /// Whether the set holds no levels.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Level stored at `position`.
    fn get(&self, position: usize) -> Option<&MultiIndex>;

    /// Position of `index`, if present.
    fn find(&self, index: &MultiIndex) -> Option<usize>;

    /// Appends the provided indices in order.
    fn add_from_list(&mut self, indices: &[MultiIndex]) -> Result<(), MimcError>;

    /// Largest number of coordinates used by any level.
    fn max_dim(&self) -> usize;

    /// Dense projection, one row per level, padded to a common width.
    fn dense_matrix(&self) -> Vec<Vec<u32>>;

    /// Sparse projection, non-zero `(dimension, value)` pairs per level.
    fn sparse_matrix(&self) -> Vec<Vec<(usize, u32)>>;

    /// Flags the levels lying on the outer boundary of the set.
    fn is_boundary(&self) -> Vec<bool>;

    /// Whether every level's backward neighbours are in the set.
    fn check_admissibility(&self) -> bool;

    /// Set-theoretic estimate of the truncation error given per-level
    /// contribution magnitudes.
    fn estimate_bias(&self, contributions: &[f64]) -> f64;

    /// Adds the most profitable admissible neighbours; returns how many
    /// levels were added.
    fn expand_set(
        &mut self,
        profit: &dyn ProfitCalculator,
        max_dim: Option<usize>,
        max_added: Option<usize>,
    ) -> Result<usize, MimcError>;

    /// All levels in position order.
    fn indices(&self) -> Vec<MultiIndex> {
        (0..self.len()).filter_map(|pos| self.get(pos).cloned()).collect()
    }
}

/// Ranks candidate levels during set expansion. Lower log-profit is added
/// first; an infinite log-profit excludes the candidate.
pub trait ProfitCalculator: fmt::Debug {
    /// Logarithm of the cost/benefit ratio of adding `index`.
    fn log_profit(&self, index: &MultiIndex) -> f64;

    /// Number of dimensions the calculator is defined on.
    fn max_dim(&self) -> usize;
}
