use mimc_core::{ErrorInfo, MimcError, SampleValue};
use serde::{Deserialize, Serialize};

/// Per-level table of power sums `Σ x^p` for `p = 1..=moments`.
///
/// Rows are created lazily the first time a level receives samples, so a
/// level that was never sampled has no row and all of its moments are
/// undefined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerSums<V> {
    moments: usize,
    rows: Vec<Option<Vec<V>>>,
}

impl<V: SampleValue> PowerSums<V> {
    /// Creates an empty table for `levels` levels.
    pub fn new(moments: usize, levels: usize) -> Self {
        Self {
            moments,
            rows: vec![None; levels],
        }
    }

    /// Number of stored powers per level.
    pub fn moments(&self) -> usize {
        self.moments
    }

    /// Number of levels tracked.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table tracks no level.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Grows the table to at least `levels` rows. Existing rows are kept.
    pub fn ensure_capacity(&mut self, levels: usize) {
        if self.rows.len() < levels {
            self.rows.resize(levels, None);
        }
    }

    /// Power sums recorded for `level`.
    pub fn row(&self, level: usize) -> Option<&[V]> {
        self.rows.get(level).and_then(|row| row.as_deref())
    }

    /// Adds `sums` (one entry per power) to the row of `level`.
    pub fn accumulate(&mut self, level: usize, sums: &[V]) -> Result<(), MimcError> {
        if sums.len() != self.moments {
            return Err(MimcError::Sampling(
                ErrorInfo::new(
                    "power-sum-shape",
                    "sampler returned the wrong number of power sums",
                )
                .with_context("level", level.to_string())
                .with_context("expected", self.moments.to_string())
                .with_context("received", sums.len().to_string()),
            ));
        }
        self.ensure_capacity(level + 1);
        if let Some(row) = self.rows[level].as_mut() {
            for (acc, value) in row.iter_mut().zip(sums) {
                *acc = acc.plus(value);
            }
        } else {
            self.rows[level] = Some(sums.to_vec());
        }
        Ok(())
    }

    /// Drops every recorded row while keeping the level count.
    pub fn clear(&mut self) {
        for row in &mut self.rows {
            *row = None;
        }
    }
}

/// Raw moments `S_p / M` for every level, `None` where the count is zero or
/// nothing was recorded.
pub fn raw_moments<V: SampleValue>(sums: &PowerSums<V>, counts: &[u64]) -> Vec<Option<Vec<V>>> {
    counts
        .iter()
        .enumerate()
        .map(|(level, &count)| {
            if count == 0 {
                return None;
            }
            sums.row(level)
                .map(|row| row.iter().map(|value| value.divide(count as f64)).collect())
        })
        .collect()
}

/// Central moment of order `order` for every level, built from raw moments
/// through the binomial expansion
/// `Σ_{k=0}^{n} C(n,k) · raw_k · (-raw_1)^{n-k}` with `raw_0 = 1`.
///
/// Levels without samples, and orders above the number of stored powers,
/// are undefined. Order one returns the mean.
pub fn central_moment<V: SampleValue>(
    sums: &PowerSums<V>,
    counts: &[u64],
    order: usize,
) -> Vec<Option<V>> {
    let undefined = || vec![None; counts.len()];
    if order == 0 || order > sums.moments() {
        return undefined();
    }
    raw_moments(sums, counts)
        .into_iter()
        .map(|raw| raw.map(|raw| central_from_raw(&raw, order)))
        .collect()
}

/// Scalar magnitudes of per-level values, NaN where undefined.
pub fn norms<V: SampleValue>(values: Vec<Option<V>>) -> Vec<f64> {
    values
        .into_iter()
        .map(|value| value.map_or(f64::NAN, |value| value.norm()))
        .collect()
}

fn central_from_raw<V: SampleValue>(raw: &[V], order: usize) -> V {
    let mean = &raw[0];
    if order == 1 {
        return mean.clone();
    }
    let n = order as i32;
    let mut value = mean.power(n).scale(sign(n));
    for k in 1..=n {
        let term = raw[(k - 1) as usize]
            .times(&mean.power(n - k))
            .scale(binomial(n, k) * sign(n - k));
        value = value.plus(&term);
    }
    value
}

fn sign(exponent: i32) -> f64 {
    if exponent % 2 == 0 {
        1.0
    } else {
        -1.0
    }
}

fn binomial(n: i32, k: i32) -> f64 {
    let k = k.min(n - k);
    (0..k).fold(1.0, |acc, i| acc * f64::from(n - i) / f64::from(i + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(samples: &[f64], moments: usize) -> PowerSums<f64> {
        let mut sums = PowerSums::new(moments, 1);
        let row: Vec<f64> = (1..=moments as i32)
            .map(|p| samples.iter().map(|x| x.powi(p)).sum())
            .collect();
        sums.accumulate(0, &row).unwrap();
        sums
    }

    #[test]
    fn second_central_moment_is_population_variance() {
        let samples = [1.0, 2.0, 3.0, 6.0];
        let sums = table(&samples, 4);
        let variance = central_moment(&sums, &[4], 2)[0].unwrap();
        assert!((variance - 3.5).abs() < 1e-12);
        let mean = central_moment(&sums, &[4], 1)[0].unwrap();
        assert!((mean - 3.0).abs() < 1e-12);
    }

    #[test]
    fn third_central_moment_matches_direct_sum() {
        let samples = [0.5, -1.0, 2.5, 4.0, 0.0];
        let sums = table(&samples, 3);
        let mean = samples.iter().sum::<f64>() / 5.0;
        let direct = samples.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / 5.0;
        let value = central_moment(&sums, &[5], 3)[0].unwrap();
        assert!((value - direct).abs() < 1e-10);
    }

    #[test]
    fn unsampled_levels_and_high_orders_are_undefined() {
        let mut sums = PowerSums::<f64>::new(2, 3);
        sums.accumulate(1, &[2.0, 4.0]).unwrap();
        let moments = central_moment(&sums, &[0, 2, 0], 2);
        assert_eq!(moments[0], None);
        assert_eq!(moments[2], None);
        assert!(moments[1].is_some());
        assert!(central_moment(&sums, &[0, 2, 0], 3).iter().all(Option::is_none));
    }

    #[test]
    fn wrong_row_width_is_rejected() {
        let mut sums = PowerSums::<f64>::new(2, 1);
        let err = sums.accumulate(0, &[1.0]).unwrap_err();
        assert_eq!(err.info().code, "power-sum-shape");
    }

    #[test]
    fn binomial_coefficients() {
        assert_eq!(binomial(4, 2), 6.0);
        assert_eq!(binomial(5, 0), 1.0);
        assert_eq!(binomial(5, 5), 1.0);
    }
}
