use std::collections::{BTreeMap, BTreeSet};

use mimc_core::errors::ErrorInfo;
use mimc_core::{LevelSet, MimcError, MultiIndex, ProfitCalculator};

const PROFIT_TIE_TOLERANCE: f64 = 1e-12;

/// Insertion-ordered set of multi-indices with map-backed lookup.
#[derive(Debug, Clone, Default)]
pub struct IndexSet {
    indices: Vec<MultiIndex>,
    lookup: BTreeMap<MultiIndex, usize>,
    min_dim: usize,
    max_dim: usize,
}

impl IndexSet {
    /// Creates an empty set whose dense projections span at least `min_dim`
    /// columns.
    pub fn new(min_dim: usize) -> Self {
        Self {
            min_dim,
            ..Self::default()
        }
    }

    /// Builds a set from a list of indices, rejecting duplicates.
    pub fn from_indices(min_dim: usize, indices: &[MultiIndex]) -> Result<Self, MimcError> {
        let mut set = Self::new(min_dim);
        set.add_from_list(indices)?;
        Ok(set)
    }

    /// Single-dimensional hierarchy `[0], [1], ..., [levels - 1]`.
    pub fn linear(levels: u32) -> Self {
        let mut set = Self::new(1);
        for ell in 0..levels {
            set.push_unchecked(MultiIndex::level(ell));
        }
        set
    }

    /// Whether `index` is in the set.
    pub fn contains(&self, index: &MultiIndex) -> bool {
        self.lookup.contains_key(index)
    }

    /// Number of dimensions inspected by boundary and expansion queries.
    pub fn width(&self) -> usize {
        self.max_dim.max(self.min_dim)
    }

    /// Whether `index` could be added without breaking admissibility.
    pub fn is_admissible(&self, index: &MultiIndex) -> bool {
        index
            .sparse()
            .into_iter()
            .all(|(d, _)| index.backward(d).map_or(true, |prev| self.contains(&prev)))
    }

    fn push_unchecked(&mut self, index: MultiIndex) {
        self.max_dim = self.max_dim.max(index.dim());
        self.lookup.insert(index.clone(), self.indices.len());
        self.indices.push(index);
    }

    fn candidates(&self, dims: usize) -> BTreeSet<MultiIndex> {
        if self.indices.is_empty() {
            return BTreeSet::from([MultiIndex::seed()]);
        }
        let mut out = BTreeSet::new();
        for index in &self.indices {
            for d in 0..dims {
                let next = index.forward(d);
                if !self.contains(&next) && self.is_admissible(&next) {
                    out.insert(next);
                }
            }
        }
        out
    }
}

impl LevelSet for IndexSet {
    fn len(&self) -> usize {
        self.indices.len()
    }

    fn get(&self, position: usize) -> Option<&MultiIndex> {
        self.indices.get(position)
    }

    fn find(&self, index: &MultiIndex) -> Option<usize> {
        self.lookup.get(index).copied()
    }

    fn add_from_list(&mut self, indices: &[MultiIndex]) -> Result<(), MimcError> {
        for index in indices {
            if self.contains(index) {
                return Err(MimcError::Levels(
                    ErrorInfo::new("index-exists", "index already in set")
                        .with_context("index", index.to_string()),
                ));
            }
            self.push_unchecked(index.clone());
        }
        Ok(())
    }

    fn max_dim(&self) -> usize {
        self.max_dim
    }

    fn dense_matrix(&self) -> Vec<Vec<u32>> {
        let width = self.width();
        self.indices.iter().map(|index| index.dense(width)).collect()
    }

    fn sparse_matrix(&self) -> Vec<Vec<(usize, u32)>> {
        self.indices.iter().map(MultiIndex::sparse).collect()
    }

    fn is_boundary(&self) -> Vec<bool> {
        let width = self.width();
        if width == 0 {
            return vec![true; self.indices.len()];
        }
        self.indices
            .iter()
            .map(|index| (0..width).any(|d| !self.contains(&index.forward(d))))
            .collect()
    }

    fn check_admissibility(&self) -> bool {
        self.indices.iter().all(|index| self.is_admissible(index))
    }

    fn estimate_bias(&self, contributions: &[f64]) -> f64 {
        let contribution = |pos: usize| contributions.get(pos).copied().unwrap_or(f64::INFINITY);
        let boundary = self.is_boundary();
        let width = self.width();
        let mut outer: BTreeMap<MultiIndex, f64> = BTreeMap::new();
        let mut seedless = 0.0;
        for (pos, index) in self.indices.iter().enumerate() {
            if !boundary[pos] {
                continue;
            }
            let current = contribution(pos);
            if !current.is_finite() {
                return f64::INFINITY;
            }
            if width == 0 {
                seedless += current;
                continue;
            }
            for d in 0..width {
                let next = index.forward(d);
                if self.contains(&next) {
                    continue;
                }
                let ratio = index
                    .backward(d)
                    .and_then(|prev| self.find(&prev))
                    .map(contribution)
                    .filter(|prev| prev.is_finite() && *prev > 0.0)
                    .map_or(1.0, |prev| (current / prev).min(1.0));
                let estimate = current * ratio;
                outer
                    .entry(next)
                    .and_modify(|value| *value = value.max(estimate))
                    .or_insert(estimate);
            }
        }
        seedless + outer.values().sum::<f64>()
    }

    fn expand_set(
        &mut self,
        profit: &dyn ProfitCalculator,
        max_dim: Option<usize>,
        max_added: Option<usize>,
    ) -> Result<usize, MimcError> {
        let dims = max_dim.unwrap_or_else(|| profit.max_dim());
        let mut ranked: Vec<(f64, MultiIndex)> = self
            .candidates(dims)
            .into_iter()
            .map(|index| (profit.log_profit(&index), index))
            .filter(|(value, _)| value.is_finite())
            .collect();
        if ranked.is_empty() {
            return Ok(0);
        }
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        let best = ranked[0].0;
        let cutoff = best + PROFIT_TIE_TOLERANCE * best.abs().max(1.0);
        let limit = max_added.unwrap_or(usize::MAX);
        let chosen: Vec<MultiIndex> = ranked
            .into_iter()
            .take_while(|(value, _)| *value <= cutoff)
            .take(limit)
            .map(|(_, index)| index)
            .collect();
        let added = chosen.len();
        for index in chosen {
            self.push_unchecked(index);
        }
        Ok(added)
    }
}
