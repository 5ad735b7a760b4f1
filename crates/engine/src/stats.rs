/// Nearest-rank percentile over an ascending-sorted sample.
///
/// Returns the value at index `ceil(pct / 100 * len) - 1`, clamped into the
/// sample, and `0.0` for an empty sample. Callers sort first.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, sorted.len() as i64 - 1) as usize;
    sorted[idx]
}

pub fn sort_samples(samples: &mut [f64]) {
    samples.sort_by(|a, b| a.total_cmp(b));
}
