// =============================================================================
// Robust statistics: winsorized aggregation
// =============================================================================

/// Value at quantile `q` of an ascending-sorted slice, linear interpolation
/// between closest ranks.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Clip every value into the `[pct, 1 - pct]` quantile band.
///
/// Non-finite values are discarded first. Returns the clipped values sorted
/// ascending.
pub fn winsorize(values: &[f64], pct: f64) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return sorted;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let lo = quantile_sorted(&sorted, pct);
    let hi = quantile_sorted(&sorted, 1.0 - pct);
    for v in sorted.iter_mut() {
        *v = v.clamp(lo, hi);
    }
    sorted
}

/// Median after winsorizing at `pct`. `None` when no finite values exist.
pub fn winsorized_median(values: &[f64], pct: f64) -> Option<f64> {
    let clipped = winsorize(values, pct);
    if clipped.is_empty() {
        return None;
    }
    Some(quantile_sorted(&clipped, 0.5))
}
