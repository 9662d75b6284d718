use mimc_core::{ErrorInfo, LevelSet, MimcError, MultiIndex, SampleValue};
use mimc_set::expand_delta;
use tracing::debug;

use crate::hierarchy::WorkModel;

/// Samples drawn for every level of a request, positioned like the level
/// set.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch<V> {
    /// Samples achieved per level.
    pub counts: Vec<u64>,
    /// Power sums of the difference estimator, `None` where nothing was drawn.
    pub delta_sums: Vec<Option<Vec<V>>>,
    /// Power sums of the fine estimator, `None` where nothing was drawn.
    pub fine_sums: Vec<Option<Vec<V>>>,
    /// Time spent per level.
    pub time: Vec<f64>,
    /// Work spent per level.
    pub work: Vec<f64>,
}

impl<V> SampleBatch<V> {
    /// Batch with nothing drawn on `levels` levels.
    pub fn empty(levels: usize) -> Self {
        Self {
            counts: vec![0; levels],
            delta_sums: (0..levels).map(|_| None).collect(),
            fine_sums: (0..levels).map(|_| None).collect(),
            time: vec![0.0; levels],
            work: vec![0.0; levels],
        }
    }

    /// Number of levels covered.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether the batch covers no level.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Draws the requested number of samples on every level of the set.
pub trait SampleAll<V: SampleValue> {
    /// `requested[l]` samples at level position `l`; zero means skip.
    fn sample_all(
        &mut self,
        levels: &dyn LevelSet,
        requested: &[u64],
        moments: usize,
        work_model: Option<&dyn WorkModel>,
    ) -> Result<SampleBatch<V>, MimcError>;
}

/// Raw values returned by one call of a [`LevelSampler`].
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDraw<V> {
    /// One row per sample, one value per corner of the difference expansion.
    pub values: Vec<Vec<V>>,
    /// Time spent.
    pub time: f64,
    /// Work spent; derived from the work model when absent.
    pub work: Option<f64>,
}

/// Evaluates the quantity of interest at the corners of one level's
/// difference expansion. The first corner is the level itself.
pub trait LevelSampler<V> {
    /// Draws up to `count` samples; fewer are allowed, none is not.
    fn sample(&mut self, corners: &[MultiIndex], count: u64) -> Result<SampleDraw<V>, MimcError>;
}

impl<V, F> LevelSampler<V> for F
where
    F: FnMut(&[MultiIndex], u64) -> Result<SampleDraw<V>, MimcError>,
{
    fn sample(&mut self, corners: &[MultiIndex], count: u64) -> Result<SampleDraw<V>, MimcError> {
        self(corners, count)
    }
}

/// Pre-aggregated power sums returned by one call of a [`SumSampler`].
#[derive(Debug, Clone, PartialEq)]
pub struct SumDraw<V> {
    /// Number of samples aggregated.
    pub count: u64,
    /// Power sums of the fine values.
    pub fine_sums: Vec<V>,
    /// Power sums of the difference values; the fine sums stand in when
    /// absent.
    pub delta_sums: Option<Vec<V>>,
    /// Time spent.
    pub time: f64,
    /// Work spent; derived from the work model when absent.
    pub work: Option<f64>,
}

/// Samples one level and aggregates the power sums itself.
pub trait SumSampler<V> {
    /// Draws up to `count` samples at the level whose expansion corners are
    /// `corners`, returning `moments` power sums.
    fn sample_sums(
        &mut self,
        corners: &[MultiIndex],
        count: u64,
        moments: usize,
    ) -> Result<SumDraw<V>, MimcError>;
}

/// Adapts a [`LevelSampler`] into [`SampleAll`], combining corner values
/// with the signed difference coefficients.
pub struct PerSampleAll<S> {
    sampler: S,
}

impl<S> PerSampleAll<S> {
    /// Wraps `sampler`.
    pub fn new(sampler: S) -> Self {
        Self { sampler }
    }
}

impl<V, S> SampleAll<V> for PerSampleAll<S>
where
    V: SampleValue,
    S: LevelSampler<V>,
{
    fn sample_all(
        &mut self,
        levels: &dyn LevelSet,
        requested: &[u64],
        moments: usize,
        work_model: Option<&dyn WorkModel>,
    ) -> Result<SampleBatch<V>, MimcError> {
        let per_level_work = work_model.map(|model| model.work(&levels.indices()));
        let mut batch = SampleBatch::empty(requested.len());
        for (pos, &target) in requested.iter().enumerate() {
            if target == 0 {
                continue;
            }
            let level = level_at(levels, pos)?;
            let (coefficients, corners): (Vec<f64>, Vec<MultiIndex>) =
                expand_delta(level).into_iter().unzip();
            debug!(level = %level, samples = target, "sampling level");
            let mut delta_sums: Option<Vec<V>> = None;
            let mut fine_sums: Option<Vec<V>> = None;
            while batch.counts[pos] < target {
                let draw = self.sampler.sample(&corners, target - batch.counts[pos])?;
                let drawn = draw.values.len() as u64;
                if drawn == 0 {
                    return Err(stalled(level, target - batch.counts[pos]));
                }
                let work = match draw.work {
                    Some(work) => work,
                    None => modelled_work(per_level_work.as_deref(), level, pos)? * drawn as f64,
                };
                for row in &draw.values {
                    if row.len() != corners.len() {
                        return Err(MimcError::Sampling(
                            ErrorInfo::new("corner-mismatch", "sample row must hold one value per corner")
                                .with_context("level", level.to_string())
                                .with_context("expected", corners.len().to_string())
                                .with_context("received", row.len().to_string()),
                        ));
                    }
                    let delta = row
                        .iter()
                        .zip(&coefficients)
                        .map(|(value, &coefficient)| value.scale(coefficient))
                        .reduce(|acc, value| acc.plus(&value))
                        .unwrap_or_else(|| row[0].clone());
                    accumulate_powers(&mut delta_sums, &delta, moments);
                    accumulate_powers(&mut fine_sums, &row[0], moments);
                }
                batch.counts[pos] += drawn;
                batch.time[pos] += draw.time;
                batch.work[pos] += work;
            }
            batch.delta_sums[pos] = delta_sums;
            batch.fine_sums[pos] = fine_sums;
        }
        Ok(batch)
    }
}

/// Adapts a [`SumSampler`] into [`SampleAll`].
pub struct SumsSampleAll<S> {
    sampler: S,
}

impl<S> SumsSampleAll<S> {
    /// Wraps `sampler`.
    pub fn new(sampler: S) -> Self {
        Self { sampler }
    }
}

impl<V, S> SampleAll<V> for SumsSampleAll<S>
where
    V: SampleValue,
    S: SumSampler<V>,
{
    fn sample_all(
        &mut self,
        levels: &dyn LevelSet,
        requested: &[u64],
        moments: usize,
        work_model: Option<&dyn WorkModel>,
    ) -> Result<SampleBatch<V>, MimcError> {
        let per_level_work = work_model.map(|model| model.work(&levels.indices()));
        let mut batch = SampleBatch::empty(requested.len());
        for (pos, &target) in requested.iter().enumerate() {
            if target == 0 {
                continue;
            }
            let level = level_at(levels, pos)?;
            let corners: Vec<MultiIndex> = expand_delta(level).into_iter().map(|(_, corner)| corner).collect();
            let mut delta_sums: Option<Vec<V>> = None;
            let mut fine_sums: Option<Vec<V>> = None;
            while batch.counts[pos] < target {
                let draw = self.sampler.sample_sums(&corners, target - batch.counts[pos], moments)?;
                if draw.count == 0 {
                    return Err(stalled(level, target - batch.counts[pos]));
                }
                let work = match draw.work {
                    Some(work) => work,
                    None => modelled_work(per_level_work.as_deref(), level, pos)? * draw.count as f64,
                };
                let delta = draw.delta_sums.as_ref().unwrap_or(&draw.fine_sums);
                add_sums(&mut delta_sums, delta);
                add_sums(&mut fine_sums, &draw.fine_sums);
                batch.counts[pos] += draw.count;
                batch.time[pos] += draw.time;
                batch.work[pos] += work;
            }
            batch.delta_sums[pos] = delta_sums;
            batch.fine_sums[pos] = fine_sums;
        }
        Ok(batch)
    }
}

fn level_at(levels: &dyn LevelSet, pos: usize) -> Result<&MultiIndex, MimcError> {
    levels.get(pos).ok_or_else(|| {
        MimcError::Levels(
            ErrorInfo::new("level-out-of-range", "sample request exceeds the level set")
                .with_context("position", pos.to_string())
                .with_context("levels", levels.len().to_string()),
        )
    })
}

fn modelled_work(per_level: Option<&[f64]>, level: &MultiIndex, pos: usize) -> Result<f64, MimcError> {
    per_level.and_then(|work| work.get(pos).copied()).ok_or_else(|| {
        MimcError::Config(
            ErrorInfo::new("missing-work", "sampler reported no work and no work model is set")
                .with_context("level", level.to_string())
                .with_hint("return work from the sampler or configure a work model"),
        )
    })
}

fn stalled(level: &MultiIndex, missing: u64) -> MimcError {
    MimcError::Sampling(
        ErrorInfo::new("sampler-stalled", "sampler returned no samples")
            .with_context("level", level.to_string())
            .with_context("missing", missing.to_string()),
    )
}

/// Adds `value^p` for `p = 1..=moments` to `sums`.
fn accumulate_powers<V: SampleValue>(sums: &mut Option<Vec<V>>, value: &V, moments: usize) {
    let mut powers = Vec::with_capacity(moments);
    let mut current = value.clone();
    for _ in 0..moments {
        let next = current.times(value);
        powers.push(current);
        current = next;
    }
    add_sums(sums, &powers);
}

fn add_sums<V: SampleValue>(sums: &mut Option<Vec<V>>, values: &[V]) {
    if let Some(acc) = sums.as_mut() {
        for (acc, value) in acc.iter_mut().zip(values) {
            *acc = acc.plus(value);
        }
    } else {
        *sums = Some(values.to_vec());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mimc_set::IndexSet;

    fn exact(corners: &[MultiIndex], count: u64) -> Result<SampleDraw<f64>, MimcError> {
        let row: Vec<f64> = corners.iter().map(|corner| 0.5f64.powi(corner.get(0) as i32)).collect();
        Ok(SampleDraw {
            values: vec![row; count.min(3) as usize],
            time: 0.1,
            work: None,
        })
    }

    #[test]
    fn per_sample_adapter_loops_until_satisfied() {
        let levels = IndexSet::linear(2);
        let mut adapter = PerSampleAll::new(exact);
        let work = |levels: &[MultiIndex]| levels.iter().map(|l| 2f64.powi(l.get(0) as i32)).collect::<Vec<_>>();
        let batch: SampleBatch<f64> = adapter.sample_all(&levels, &[0, 7], 2, Some(&work as &dyn WorkModel)).unwrap();
        assert_eq!(batch.counts, vec![0, 7]);
        assert!(batch.delta_sums[0].is_none());
        // delta = 0.5 - 1.0
        let delta = batch.delta_sums[1].as_ref().unwrap();
        assert!((delta[0] + 3.5).abs() < 1e-12);
        assert!((delta[1] - 1.75).abs() < 1e-12);
        assert!((batch.fine_sums[1].as_ref().unwrap()[0] - 3.5).abs() < 1e-12);
        assert!((batch.work[1] - 14.0).abs() < 1e-12);
        assert!((batch.time[1] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn missing_work_is_a_config_error() {
        let levels = IndexSet::linear(1);
        let mut adapter = PerSampleAll::new(exact);
        let err = SampleAll::<f64>::sample_all(&mut adapter, &levels, &[1], 1, None).unwrap_err();
        assert_eq!(err.info().code, "missing-work");
    }

    #[test]
    fn empty_draw_stalls() {
        let levels = IndexSet::linear(1);
        let mut adapter = PerSampleAll::new(|_: &[MultiIndex], _: u64| -> Result<SampleDraw<f64>, MimcError> {
            Ok(SampleDraw {
                values: Vec::new(),
                time: 0.0,
                work: Some(0.0),
            })
        });
        let err = adapter.sample_all(&levels, &[2], 1, None).unwrap_err();
        assert!(matches!(err, MimcError::Sampling(_)));
        assert_eq!(err.info().code, "sampler-stalled");
    }

    struct Constant;

    impl SumSampler<f64> for Constant {
        fn sample_sums(&mut self, _corners: &[MultiIndex], count: u64, moments: usize) -> Result<SumDraw<f64>, MimcError> {
            let count = count.min(4);
            Ok(SumDraw {
                count,
                fine_sums: vec![2.0 * count as f64; moments],
                delta_sums: None,
                time: 0.0,
                work: Some(count as f64),
            })
        }
    }

    #[test]
    fn sums_adapter_uses_fine_sums_as_delta_by_default() {
        let levels = IndexSet::linear(1);
        let mut adapter = SumsSampleAll::new(Constant);
        let batch: SampleBatch<f64> = adapter.sample_all(&levels, &[10], 2, None).unwrap();
        assert_eq!(batch.counts, vec![10]);
        assert_eq!(batch.delta_sums[0], Some(vec![20.0, 20.0]));
        assert_eq!(batch.work, vec![10.0]);
    }
}
