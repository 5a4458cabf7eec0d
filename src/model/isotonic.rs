//! Isotonic calibration via pool-adjacent-violators
//!
//! The fitted curve is a non-decreasing step function over the training
//! scores. Scores below the first block map to the first level, scores
//! above the last block to the last level.

use serde::{Deserialize, Serialize};

/// One constant block of the step function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct Block {
    /// Smallest training score pooled into the block.
    lower: f64,
    level: f64,
}

/// Fitted isotonic calibration curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsotonicCalibrator {
    blocks: Vec<Block>,
}

impl IsotonicCalibrator {
    /// Fit against observed outcomes.
    ///
    /// Ties in score are pooled into one point first (mean outcome, summed
    /// weight), which keeps the fit independent of input order. Non-finite
    /// pairs are skipped. With no usable pair the curve is the identity.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(scores: &[f64], outcomes: &[f64]) -> Self {
        let mut pairs: Vec<(f64, f64)> = scores
            .iter()
            .zip(outcomes)
            .filter(|(s, o)| s.is_finite() && o.is_finite())
            .map(|(s, o)| (*s, *o))
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));

        // (lower score, weighted sum, weight)
        let mut pooled: Vec<(f64, f64, f64)> = Vec::with_capacity(pairs.len());
        for (score, outcome) in pairs {
            match pooled.last_mut() {
                Some(last) if last.0.total_cmp(&score).is_eq() => {
                    last.1 += outcome;
                    last.2 += 1.0;
                }
                _ => pooled.push((score, outcome, 1.0)),
            }
        }

        let mut stack: Vec<(f64, f64, f64)> = Vec::with_capacity(pooled.len());
        for point in pooled {
            stack.push(point);
            while stack.len() > 1 {
                let top = stack[stack.len() - 1];
                let below = stack[stack.len() - 2];
                if below.1 / below.2 > top.1 / top.2 {
                    stack.pop();
                    if let Some(b) = stack.last_mut() {
                        b.1 += top.1;
                        b.2 += top.2;
                    }
                } else {
                    break;
                }
            }
        }

        Self {
            blocks: stack
                .into_iter()
                .map(|(lower, sum, weight)| Block {
                    lower,
                    level: sum / weight,
                })
                .collect(),
        }
    }

    /// Map a raw score through the curve.
    #[must_use]
    pub fn apply(&self, score: f64) -> f64 {
        if self.blocks.is_empty() || !score.is_finite() {
            return score;
        }
        let idx = self.blocks.partition_point(|b| b.lower <= score);
        self.blocks[idx.saturating_sub(1)].level
    }

    /// Map every score.
    #[must_use]
    pub fn apply_all(&self, scores: &[f64]) -> Vec<f64> {
        scores.iter().map(|s| self.apply(*s)).collect()
    }

    /// Number of constant blocks.
    #[must_use]
    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotone_input_is_unchanged() {
        let cal = IsotonicCalibrator::fit(&[1.0, 2.0, 3.0], &[0.1, 0.5, 0.9]);
        assert_eq!(cal.n_blocks(), 3);
        assert!((cal.apply(2.0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_violators_are_pooled() {
        let cal = IsotonicCalibrator::fit(&[1.0, 2.0, 3.0, 4.0], &[0.0, 1.0, 0.0, 1.0]);
        assert_eq!(cal.n_blocks(), 3);
        assert!((cal.apply(2.5) - 0.5).abs() < f64::EPSILON);
        assert!((cal.apply(3.0) - 0.5).abs() < f64::EPSILON);
        assert!((cal.apply(4.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clamps_outside_range() {
        let cal = IsotonicCalibrator::fit(&[1.0, 2.0], &[0.2, 0.8]);
        assert!((cal.apply(-10.0) - 0.2).abs() < f64::EPSILON);
        assert!((cal.apply(10.0) - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ties_are_order_independent() {
        let a = IsotonicCalibrator::fit(&[1.0, 1.0, 2.0], &[0.0, 1.0, 1.0]);
        let b = IsotonicCalibrator::fit(&[1.0, 1.0, 2.0], &[1.0, 0.0, 1.0]);
        assert_eq!(a, b);
        assert!((a.apply(1.0) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_output_is_non_decreasing() {
        let scores: Vec<f64> = (0..50).map(|i| f64::from(i) * 0.1).collect();
        let outcomes: Vec<f64> = (0..50).map(|i| f64::from((i * 37) % 5)).collect();
        let cal = IsotonicCalibrator::fit(&scores, &outcomes);
        let mapped = cal.apply_all(&scores);
        assert!(mapped.windows(2).all(|w| w[0] <= w[1]));
    }
}
