use mimc_core::MultiIndex;

/// Expands `level` into the corners of the hypercube `{level, level - 1}^k`
/// spanned by its non-zero coordinates, paired with the signed coefficient
/// `(-1)^{number of decremented coordinates}`.
///
/// Corners come in product order with `level` itself first, so
/// `expand_delta([2])` yields `[(+1, [2]), (-1, [1])]` and the seed level
/// expands to itself alone.
pub fn expand_delta(level: &MultiIndex) -> Vec<(f64, MultiIndex)> {
    let mut corners: Vec<(u32, Vec<u32>)> = vec![(0, Vec::with_capacity(level.dim()))];
    for &value in level.as_slice() {
        let mut next = Vec::with_capacity(corners.len() * 2);
        for (parity, prefix) in &corners {
            let mut keep = prefix.clone();
            keep.push(value);
            next.push((*parity, keep));
            if value > 0 {
                let mut lower = prefix.clone();
                lower.push(value - 1);
                next.push((parity + 1, lower));
            }
        }
        corners = next;
    }
    corners
        .into_iter()
        .map(|(parity, coords)| {
            let sign = if parity % 2 == 0 { 1.0 } else { -1.0 };
            (sign, MultiIndex::new(coords))
        })
        .collect()
}
