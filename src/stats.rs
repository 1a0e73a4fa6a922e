//! Statistical Kernel (§4.1) — pure, stateless operations on equal-length
//! numeric sequences. Never panics; undefined inputs (NaN/Inf, zero
//! variance, short sequences) yield a sentinel of `0.0` rather than an
//! error, matching the "Failure" contract in spec.md §4.1.

use statrs::statistics::Statistics;

/// Reference sample size used to discount the suspicion score for thin
/// evidence (§4.1 "Suspicion Score").
const SAMPLE_SIZE_REFERENCE: f64 = 30.0;
/// Weight given to Pearson/Spearman magnitude in the suspicion score.
const CORRELATION_WEIGHT: f64 = 0.35;
/// Flat bonus when the cause candidate precedes the impact with a strong
/// cross-correlation.
const LAG_BONUS: f64 = 0.15;
/// Multiplier applied to the correlation term when partial correlation
/// suggests confounding (`|partial| < 0.5*|pearson|`).
const CONFOUNDING_PENALTY: f64 = 0.6;
/// Multiplier applied when partial correlation supports a direct link
/// (`|partial| >= 0.8*|pearson|`).
const CONFOUNDING_BOOST: f64 = 1.1;
/// Weight given to anomaly density in the suspicion score (`α`).
const ANOMALY_WEIGHT: f64 = 0.2;
/// Suspicion score is never allowed to reach full confidence.
const SUSPICION_CAP: f64 = 0.95;

fn has_variance(x: &[f64]) -> bool {
    if x.len() < 2 {
        return false;
    }
    let first = x[0];
    x.iter().any(|v| (*v - first).abs() > f64::EPSILON)
}

fn finite(x: &[f64]) -> bool {
    x.iter().all(|v| v.is_finite())
}

/// Pearson product-moment correlation coefficient.
///
/// Domain: `x.len() == y.len() >= 2` and at least one non-zero variance in
/// each series. Returns `0.0` when either series is constant, the lengths
/// mismatch, or any value is non-finite.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 || !finite(x) || !finite(y) {
        return 0.0;
    }
    if !has_variance(x) || !has_variance(y) {
        return 0.0;
    }

    let mean_x = x.mean();
    let mean_y = y.mean();

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return 0.0;
    }

    let r = cov / (var_x.sqrt() * var_y.sqrt());
    r.clamp(-1.0, 1.0)
}

/// Average-rank transform, ties resolved by averaging ranks of equal
/// values (standard Spearman tie handling).
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut indexed: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut result = vec![0.0; values.len()];
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i;
        while j + 1 < indexed.len() && indexed[j + 1].1 == indexed[i].1 {
            j += 1;
        }
        // Ranks are 1-based; average rank over the tied run [i, j].
        let avg_rank = ((i + 1) + (j + 1)) as f64 / 2.0;
        for slot in indexed.iter().take(j + 1).skip(i) {
            result[slot.0] = avg_rank;
        }
        i = j + 1;
    }
    result
}

/// Spearman rank correlation: Pearson of the rank-transformed series.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() < 2 || !finite(x) || !finite(y) {
        return 0.0;
    }
    pearson(&ranks(x), &ranks(y))
}

/// Cross-correlation with lag search. For each lag `k` in
/// `[-max_lag, max_lag]`, computes Pearson on the overlapping window and
/// returns `(max_value, argmax_lag)`. Ties are broken by smallest `|lag|`,
/// then smallest lag.
pub fn cross_correlation(x: &[f64], y: &[f64], max_lag: usize) -> (f64, i64) {
    if x.len() != y.len() || x.is_empty() {
        return (0.0, 0);
    }

    let n = x.len() as i64;
    let mut best_value = f64::NEG_INFINITY;
    let mut best_lag = 0i64;
    let mut found = false;

    for lag in -(max_lag as i64)..=(max_lag as i64) {
        let (xs, ys): (Vec<f64>, Vec<f64>) = if lag >= 0 {
            if lag >= n {
                continue;
            }
            let x_slice = &x[..x.len() - lag as usize];
            let y_slice = &y[lag as usize..];
            (x_slice.to_vec(), y_slice.to_vec())
        } else {
            let shift = (-lag) as usize;
            if shift as i64 >= n {
                continue;
            }
            let x_slice = &x[shift..];
            let y_slice = &y[..y.len() - shift];
            (x_slice.to_vec(), y_slice.to_vec())
        };

        if xs.len() < 2 {
            continue;
        }

        let value = pearson(&xs, &ys);
        let better = if !found {
            true
        } else if value > best_value {
            true
        } else if value == best_value {
            lag.abs() < best_lag.abs() || (lag.abs() == best_lag.abs() && lag < best_lag)
        } else {
            false
        };

        if better {
            best_value = value;
            best_lag = lag;
            found = true;
        }
    }

    if !found {
        (0.0, 0)
    } else {
        (best_value, best_lag)
    }
}

/// Ordinary least-squares residuals of `values` regressed on `predictor`
/// (single predictor, closed form). Returns `values` unchanged when
/// `predictor` has zero variance.
fn residualize(values: &[f64], predictor: &[f64]) -> Vec<f64> {
    if !has_variance(predictor) {
        return values.to_vec();
    }

    let mean_p = predictor.mean();
    let mean_v = values.mean();

    let mut cov = 0.0;
    let mut var_p = 0.0;
    for (v, p) in values.iter().zip(predictor.iter()) {
        cov += (p - mean_p) * (v - mean_v);
        var_p += (p - mean_p) * (p - mean_p);
    }

    if var_p <= f64::EPSILON {
        return values.to_vec();
    }

    let slope = cov / var_p;
    let intercept = mean_v - slope * mean_p;

    values
        .iter()
        .zip(predictor.iter())
        .map(|(v, p)| v - (slope * p + intercept))
        .collect()
}

/// Partial correlation of `x` and `y` controlling for confounder `z`:
/// residualize both against `z` via OLS, then Pearson of the residuals.
/// Returns `0.0` when `z` has zero variance.
pub fn partial_correlation(x: &[f64], y: &[f64], z: &[f64]) -> f64 {
    if x.len() != y.len() || x.len() != z.len() || x.len() < 3 {
        return 0.0;
    }
    if !has_variance(z) {
        return 0.0;
    }

    let rx = residualize(x, z);
    let ry = residualize(y, z);
    pearson(&rx, &ry)
}

/// Inputs to the suspicion-score composition (§4.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct SuspicionInputs {
    pub pearson: f64,
    pub spearman: f64,
    pub cross_corr_max: f64,
    pub cross_corr_lag: i64,
    pub sample_size: usize,
    pub min_correlation: f64,
    pub partial: Option<f64>,
    pub anomaly_density: f64,
}

/// Composes the bounded `[0, 0.95]` suspicion score from the statistics
/// above. Monotone non-decreasing in `|pearson|`, `|spearman|`, and
/// `anomaly_density` when the other inputs are held fixed.
pub fn suspicion_score(inputs: &SuspicionInputs) -> f64 {
    let clamp_weak = |v: f64| {
        if v.abs() < inputs.min_correlation {
            0.0
        } else {
            v.abs()
        }
    };

    let pearson_term = clamp_weak(inputs.pearson) * CORRELATION_WEIGHT;
    let spearman_term = clamp_weak(inputs.spearman) * CORRELATION_WEIGHT;
    let mut correlation_term = pearson_term + spearman_term;

    if let Some(partial) = inputs.partial {
        let pearson_abs = inputs.pearson.abs();
        if pearson_abs > f64::EPSILON {
            if partial.abs() < 0.5 * pearson_abs {
                correlation_term *= CONFOUNDING_PENALTY;
            } else if partial.abs() >= 0.8 * pearson_abs {
                correlation_term *= CONFOUNDING_BOOST;
            }
        }
    }

    let mut score = correlation_term;

    if inputs.cross_corr_max > 0.5 && inputs.cross_corr_lag > 0 {
        score += LAG_BONUS;
    }

    let sample_discount = (inputs.sample_size as f64 / SAMPLE_SIZE_REFERENCE).min(1.0);
    score *= sample_discount;

    score += ANOMALY_WEIGHT * inputs.anomaly_density.clamp(0.0, 1.0);

    score.clamp(0.0, SUSPICION_CAP)
}
