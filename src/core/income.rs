use super::types::{IncomeSeries, RelativeGain};

/// Pointwise `(reform - baseline) / baseline` over ids present in both series.
///
/// Ids missing from either side are dropped, as are zero baselines and any
/// non-finite result.
pub fn relative_gain(baseline: &IncomeSeries, reform: &IncomeSeries) -> RelativeGain {
    baseline
        .iter()
        .filter_map(|(id, base)| {
            let after = reform.get(id)?;
            if base == 0.0 {
                return None;
            }
            Some((id, (after - base) / base))
        })
        .collect()
}

/// Relative change from `before` to `after`; zero when `before` is zero.
pub fn relative_change(before: f64, after: f64) -> f64 {
    if before == 0.0 || !before.is_finite() || !after.is_finite() {
        return 0.0;
    }
    (after - before) / before
}

pub fn winners_share(baseline: &IncomeSeries, reform: &IncomeSeries, margin: f64) -> f64 {
    aligned_share(baseline, reform, |base, after| after > base + margin)
}

pub fn losers_share(baseline: &IncomeSeries, reform: &IncomeSeries, margin: f64) -> f64 {
    aligned_share(baseline, reform, |base, after| after < base - margin)
}

fn aligned_share(
    baseline: &IncomeSeries,
    reform: &IncomeSeries,
    pred: impl Fn(f64, f64) -> bool,
) -> f64 {
    let mut total = 0_usize;
    let mut hits = 0_usize;
    for (id, base) in baseline.iter() {
        let Some(after) = reform.get(id) else {
            continue;
        };
        total += 1;
        if pred(base, after) {
            hits += 1;
        }
    }
    if total == 0 {
        return 0.0;
    }
    hits as f64 / total as f64
}

/// Gini coefficient via the sorted-rank form of mean absolute difference.
pub fn gini(series: &IncomeSeries) -> f64 {
    let mut values: Vec<f64> = series.values().filter(|v| v.is_finite()).collect();
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let total: f64 = values.iter().sum();
    if total == 0.0 {
        return 0.0;
    }
    let weighted: f64 = values
        .iter()
        .enumerate()
        .map(|(i, v)| (2.0 * (i as f64 + 1.0) - n as f64 - 1.0) * v)
        .sum();
    weighted / (n as f64 * total)
}
