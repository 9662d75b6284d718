use crate::iteration::LevelRole;

/// Optimal per-level sample counts for tolerance `tol`.
///
/// With `V_l` the level variances and `W_l` the work per sample,
/// `M_l = ⌈max(minimum, (θ·tol/Ca)^{-2} · sqrt(V_l/W_l) · Σ_k sqrt(V_k·W_k))⌉`
/// over the used levels. Inactive levels and levels with undefined variance
/// get zero samples; negative variances are treated as zero. A level whose
/// work is not positive cannot be weighed and gets `minimum`.
pub fn theoretical_sample_count(
    tol: f64,
    theta: f64,
    variance: &[f64],
    work: &[f64],
    roles: &[LevelRole],
    confidence_factor: f64,
    minimum: u64,
) -> Vec<u64> {
    let weighable = |l: usize| {
        roles.get(l).is_some_and(|role| role.is_used())
            && !variance[l].is_nan()
            && work.get(l).is_some_and(|w| w.is_finite() && *w > 0.0)
    };
    let total: f64 = (0..variance.len())
        .filter(|&l| weighable(l))
        .map(|l| (variance[l].max(0.0) * work[l]).sqrt())
        .sum();
    let scale = (theta * tol / confidence_factor).powi(-2);
    let minimum_f = minimum as f64;
    (0..variance.len())
        .map(|l| {
            let used = roles.get(l).is_some_and(|role| role.is_used());
            if !used || variance[l].is_nan() {
                return 0;
            }
            if !weighable(l) {
                return minimum;
            }
            let count = scale * (variance[l].max(0.0) / work[l]).sqrt() * total;
            count.max(minimum_f).ceil() as u64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: [LevelRole; 3] = [LevelRole::Base, LevelRole::Active, LevelRole::Active];

    #[test]
    fn classical_allocation() {
        let counts = theoretical_sample_count(0.125, 0.5, &[1.0, 0.25, 0.0625], &[1.0, 4.0, 16.0], &ROLES, 2.0, 1);
        // (2^-5)^-2 = 1024, Σ sqrt(VW) = 3.
        assert_eq!(counts, vec![3072, 768, 192]);
    }

    #[test]
    fn undefined_and_inactive_levels_get_nothing() {
        let roles = [LevelRole::Inactive, LevelRole::Base, LevelRole::Active];
        let counts = theoretical_sample_count(0.1, 0.5, &[1.0, f64::NAN, 1.0], &[1.0, 1.0, 1.0], &roles, 2.0, 3);
        assert_eq!(counts[0], 0);
        assert_eq!(counts[1], 0);
        assert!(counts[2] > 3);
    }

    #[test]
    fn zero_variance_returns_minimum() {
        let counts = theoretical_sample_count(0.1, 0.5, &[0.0, 0.0, -1e-18], &[1.0, 2.0, 4.0], &ROLES, 2.0, 5);
        assert_eq!(counts, vec![5, 5, 5]);
    }
}
