//! Metric functions over `(observed, predicted)` pairs
//!
//! Every function returns `Err(Undefined)` rather than a placeholder value
//! when the metric cannot be computed on the given slice, so callers can
//! omit the row instead of reporting a misleading zero.

use crate::experiment::Metric;

/// Probability clamp for log-loss and logit transforms.
const PROB_EPS: f64 = 1e-15;

/// Probability clamp before the logit in calibration regression.
const LOGIT_EPS: f64 = 1e-6;

/// Target specificity for [`Metric::SensAt90sp`].
const TARGET_SPECIFICITY: f64 = 0.9;

/// Why a metric is undefined on a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Undefined(pub &'static str);

type MetricResult = Result<f64, Undefined>;

/// Compute `metric` for observed values and calibrated predictions.
///
/// `binary` selects the classification definitions of the calibration
/// metrics (logistic recalibration) over the regression ones (OLS of
/// observed on predicted).
///
/// # Errors
///
/// Returns `Undefined` when the slice does not support the metric.
pub fn compute(metric: Metric, observed: &[f64], predicted: &[f64], binary: bool) -> MetricResult {
    if observed.is_empty() || observed.len() != predicted.len() {
        return Err(Undefined("empty or mismatched slice"));
    }
    match metric {
        Metric::Auc => auc(observed, predicted),
        Metric::PrAuc => average_precision(observed, predicted),
        Metric::Brier => Ok(brier(observed, predicted)),
        Metric::Logloss => Ok(log_loss(observed, predicted)),
        Metric::SensAt90sp => sensitivity_at_specificity(observed, predicted, TARGET_SPECIFICITY),
        Metric::CalSlope | Metric::CalIntercept => {
            let (intercept, slope) = if binary {
                logistic_calibration(observed, predicted)?
            } else {
                linear_calibration(observed, predicted)?
            };
            Ok(if metric == Metric::CalSlope { slope } else { intercept })
        }
        Metric::R2 => r2(observed, predicted),
        Metric::Mae => Ok(mae(observed, predicted)),
    }
}

fn class_counts(observed: &[f64]) -> (usize, usize) {
    let positives = observed.iter().filter(|&&y| y > 0.5).count();
    (positives, observed.len() - positives)
}

fn require_both_classes(observed: &[f64]) -> Result<(usize, usize), Undefined> {
    match class_counts(observed) {
        (0, _) => Err(Undefined("no positive cases")),
        (_, 0) => Err(Undefined("no negative cases")),
        counts => Ok(counts),
    }
}

/// Rank-based AUC (Mann-Whitney U) with average ranks for ties.
#[allow(clippy::cast_precision_loss)]
fn auc(observed: &[f64], predicted: &[f64]) -> MetricResult {
    let (pos, neg) = require_both_classes(observed)?;
    let mut order: Vec<usize> = (0..predicted.len()).collect();
    order.sort_by(|&a, &b| predicted[a].total_cmp(&predicted[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && predicted[order[j + 1]] == predicted[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            if observed[k] > 0.5 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }
    let (pos, neg) = (pos as f64, neg as f64);
    Ok((rank_sum_pos - pos * (pos + 1.0) / 2.0) / (pos * neg))
}

/// Average precision: sum over distinct thresholds of `(R_n - R_{n-1}) * P_n`.
#[allow(clippy::cast_precision_loss)]
fn average_precision(observed: &[f64], predicted: &[f64]) -> MetricResult {
    let (pos, _) = require_both_classes(observed)?;
    let mut order: Vec<usize> = (0..predicted.len()).collect();
    order.sort_by(|&a, &b| predicted[b].total_cmp(&predicted[a]));

    let mut ap = 0.0;
    let mut tp = 0usize;
    let mut seen = 0usize;
    let mut prev_recall = 0.0;
    let mut i = 0;
    while i < order.len() {
        let threshold = predicted[order[i]];
        while i < order.len() && predicted[order[i]] == threshold {
            if observed[order[i]] > 0.5 {
                tp += 1;
            }
            seen += 1;
            i += 1;
        }
        let recall = tp as f64 / pos as f64;
        let precision = tp as f64 / seen as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    Ok(ap)
}

#[allow(clippy::cast_precision_loss)]
fn brier(observed: &[f64], predicted: &[f64]) -> f64 {
    observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (p - y).powi(2))
        .sum::<f64>()
        / observed.len() as f64
}

#[allow(clippy::cast_precision_loss)]
fn log_loss(observed: &[f64], predicted: &[f64]) -> f64 {
    -observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| {
            let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
            y.mul_add(p.ln(), (1.0 - y) * (1.0 - p).ln())
        })
        .sum::<f64>()
        / observed.len() as f64
}

/// Highest sensitivity over thresholds whose specificity reaches `target`.
/// The all-negative threshold (sensitivity 0, specificity 1) always qualifies.
#[allow(clippy::cast_precision_loss)]
fn sensitivity_at_specificity(observed: &[f64], predicted: &[f64], target: f64) -> MetricResult {
    let (pos, neg) = require_both_classes(observed)?;
    let mut order: Vec<usize> = (0..predicted.len()).collect();
    order.sort_by(|&a, &b| predicted[b].total_cmp(&predicted[a]));

    let mut best = 0.0_f64;
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut i = 0;
    while i < order.len() {
        let threshold = predicted[order[i]];
        while i < order.len() && predicted[order[i]] == threshold {
            if observed[order[i]] > 0.5 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let specificity = 1.0 - fp as f64 / neg as f64;
        if specificity + 1e-12 >= target {
            best = best.max(tp as f64 / pos as f64);
        }
    }
    Ok(best)
}

#[allow(clippy::cast_precision_loss)]
fn r2(observed: &[f64], predicted: &[f64]) -> MetricResult {
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let ss_tot: f64 = observed.iter().map(|y| (y - mean).powi(2)).sum();
    if ss_tot <= f64::EPSILON {
        return Err(Undefined("observed values have zero variance"));
    }
    let ss_res: f64 = observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    Ok(1.0 - ss_res / ss_tot)
}

#[allow(clippy::cast_precision_loss)]
fn mae(observed: &[f64], predicted: &[f64]) -> f64 {
    observed
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).abs())
        .sum::<f64>()
        / observed.len() as f64
}

/// OLS of observed on predicted: returns `(intercept, slope)`.
#[allow(clippy::cast_precision_loss)]
fn linear_calibration(observed: &[f64], predicted: &[f64]) -> Result<(f64, f64), Undefined> {
    let n = observed.len() as f64;
    let mx = predicted.iter().sum::<f64>() / n;
    let my = observed.iter().sum::<f64>() / n;
    let sxx: f64 = predicted.iter().map(|x| (x - mx).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return Err(Undefined("predictions have zero variance"));
    }
    let sxy: f64 = predicted
        .iter()
        .zip(observed)
        .map(|(x, y)| (x - mx) * (y - my))
        .sum();
    let slope = sxy / sxx;
    Ok((slope.mul_add(-mx, my), slope))
}

/// Logistic regression of the outcome on `logit(p)` by Newton's method:
/// returns `(intercept, slope)`.
fn logistic_calibration(observed: &[f64], predicted: &[f64]) -> Result<(f64, f64), Undefined> {
    require_both_classes(observed)?;
    let logits: Vec<f64> = predicted
        .iter()
        .map(|p| {
            let p = p.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
            (p / (1.0 - p)).ln()
        })
        .collect();
    let (_, sx) = crate::clock::mean_std(&logits);
    if sx <= f64::EPSILON {
        return Err(Undefined("predictions have zero variance"));
    }

    let (mut a, mut b) = (0.0_f64, 0.0_f64);
    for _ in 0..100 {
        let (mut g0, mut g1, mut h00, mut h01, mut h11) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (x, y) in logits.iter().zip(observed) {
            let mu = crate::model::sigmoid(b.mul_add(*x, a));
            let w = mu * (1.0 - mu);
            g0 += y - mu;
            g1 += (y - mu) * x;
            h00 += w;
            h01 += w * x;
            h11 += w * x * x;
        }
        let det = h00.mul_add(h11, -(h01 * h01));
        if det.abs() <= f64::EPSILON {
            return Err(Undefined("calibration fit is singular"));
        }
        let da = (h11 * g0 - h01 * g1) / det;
        let db = (h00 * g1 - h01 * g0) / det;
        a += da;
        b += db;
        if !(a.is_finite() && b.is_finite()) {
            return Err(Undefined("calibration fit diverged"));
        }
        if da.abs().max(db.abs()) < 1e-10 {
            return Ok((a, b));
        }
    }
    Err(Undefined("calibration fit did not converge"))
}
