//! Multi-index levels.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A level of the approximation hierarchy.
///
/// Stored in canonical form: trailing zero coordinates are trimmed, so the
/// seed level is the empty index `[]` and `[2, 0]` equals `[2]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct MultiIndex(Vec<u32>);

impl MultiIndex {
    /// Creates an index from dense coordinates, trimming trailing zeros.
    pub fn new(coords: impl Into<Vec<u32>>) -> Self {
        let mut coords = coords.into();
        while coords.last() == Some(&0) {
            coords.pop();
        }
        Self(coords)
    }

    /// The seed (all-zero) index.
    pub fn seed() -> Self {
        Self(Vec::new())
    }

    /// Single-dimensional index `[ell]`.
    pub fn level(ell: u32) -> Self {
        Self::new(vec![ell])
    }

    /// Number of stored coordinates (position of the last non-zero entry + 1).
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Number of non-zero coordinates.
    pub fn active(&self) -> usize {
        self.0.iter().filter(|&&value| value > 0).count()
    }

    /// Coordinate `d`, zero beyond the stored length.
    pub fn get(&self, d: usize) -> u32 {
        self.0.get(d).copied().unwrap_or(0)
    }

    /// Sum of all coordinates.
    pub fn order(&self) -> u64 {
        self.0.iter().map(|&value| value as u64).sum()
    }

    /// Dense coordinates padded (or truncated) to `width`.
    pub fn dense(&self, width: usize) -> Vec<u32> {
        (0..width).map(|d| self.get(d)).collect()
    }

    /// Non-zero `(dimension, value)` pairs in increasing dimension order.
    pub fn sparse(&self) -> Vec<(usize, u32)> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, &value)| value > 0)
            .map(|(d, &value)| (d, value))
            .collect()
    }

    /// Returns the index shifted by `+1` along dimension `d`.
    pub fn forward(&self, d: usize) -> Self {
        let mut coords = self.dense(self.dim().max(d + 1));
        coords[d] += 1;
        Self::new(coords)
    }

    /// Returns the index shifted by `-1` along dimension `d`, if it exists.
    pub fn backward(&self, d: usize) -> Option<Self> {
        if self.get(d) == 0 {
            return None;
        }
        let mut coords = self.0.clone();
        coords[d] -= 1;
        Some(Self::new(coords))
    }

    /// Borrowed view of the canonical coordinates.
    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }
}

impl From<Vec<u32>> for MultiIndex {
    fn from(coords: Vec<u32>) -> Self {
        Self::new(coords)
    }
}

impl From<MultiIndex> for Vec<u32> {
    fn from(index: MultiIndex) -> Self {
        index.0
    }
}

impl fmt::Display for MultiIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, value) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "]")
    }
}
