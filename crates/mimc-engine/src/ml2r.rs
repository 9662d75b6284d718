/// Multilevel Richardson–Romberg combination weights for a window of
/// `L + 1` levels, returned as the reverse cumulative sum
/// `cum[ℓ] = Σ_{k ≥ ℓ} w[k]` with
/// `w[ℓ] = (-1)^{L-ℓ} e^{-α(L-ℓ)(L+1-ℓ)/2} / (D[ℓ]·D[L-ℓ])` and
/// `D[j] = Π_{k<j} (1 - e^{-α(k+1)})`.
///
/// The raw weights sum to one, so `cum[0] == 1`.
pub fn combination_weights(alpha: f64, levels: usize) -> Vec<f64> {
    let mut denom = Vec::with_capacity(levels + 2);
    denom.push(1.0);
    for k in 0..=levels {
        let prev = denom[k];
        denom.push(prev * (1.0 - (-alpha * (k as f64 + 1.0)).exp()));
    }
    let raw: Vec<f64> = (0..=levels)
        .map(|ell| {
            let gap = (levels - ell) as f64;
            let sign = if (levels - ell) % 2 == 0 { 1.0 } else { -1.0 };
            sign * (-alpha * gap * (gap + 1.0) / 2.0).exp() / (denom[ell] * denom[levels - ell])
        })
        .collect();
    let mut cumulative = raw;
    for ell in (0..levels).rev() {
        cumulative[ell] += cumulative[ell + 1];
    }
    cumulative
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_window_is_plain_monte_carlo() {
        assert_eq!(combination_weights(0.7, 0), vec![1.0]);
    }

    #[test]
    fn two_level_window() {
        let alpha = 2f64.ln();
        // Raw weights [-1, 2].
        let weights = combination_weights(alpha, 1);
        assert!((weights[0] - 1.0).abs() < 1e-12);
        assert!((weights[1] - 2.0).abs() < 1e-12);
    }
}
