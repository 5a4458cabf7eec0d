//! Drift scorer: a seeded linear "clock" and its residual against reference time
//!
//! The clock is a reproducible stand-in, not a trained predictor:
//!
//! 1. draw a seeded subset of candidate columns (at most `max_features`)
//! 2. draw one weight per selected column, uniform in `[-1, 1)`
//! 3. `raw = X_sel . w / |sel| + intercept`
//! 4. `normalized = (raw - mean) / (std + eps)` with training-set stats
//! 5. `clock_time = center + spread * normalized`
//! 6. `drift = clock_time - reference_time`
//!
//! Positive drift means the clock reads later than the reference.

use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::FeatureMatrix;
use crate::{Error, Result};

/// Guard added to the standard deviation before dividing.
pub const NORMALIZATION_EPSILON: f64 = 1e-8;

/// Default cap on the number of selected columns.
pub const DEFAULT_MAX_FEATURES: usize = 50;

/// Fitted clock. Immutable after [`DriftScorer::fit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockWeights {
    features: Vec<String>,
    coefficients: Vec<f64>,
    intercept: f64,
    mean: f64,
    std: f64,
    center: f64,
    spread: f64,
}

impl ClockWeights {
    /// Selected feature names, in column order.
    #[must_use]
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// One coefficient per selected feature.
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Scalar intercept added to the raw score.
    #[must_use]
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Training raw-score mean and population standard deviation.
    #[must_use]
    pub const fn normalization(&self) -> (f64, f64) {
        (self.mean, self.std)
    }

    /// Reference-scale center.
    #[must_use]
    pub const fn center(&self) -> f64 {
        self.center
    }

    /// Reference-scale spread.
    #[must_use]
    pub const fn spread(&self) -> f64 {
        self.spread
    }
}

/// Per-sample clock outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClockScores {
    /// Weighted feature average.
    pub raw: Vec<f64>,
    /// Raw score standardized with the training statistics.
    pub normalized: Vec<f64>,
    /// Normalized score mapped onto the reference time scale.
    pub clock_time: Vec<f64>,
    /// `clock_time - reference_time`.
    pub drift: Vec<f64>,
}

/// Clock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftScorer {
    /// Upper bound on selected columns.
    pub max_features: usize,
    /// Fixed center; defaults to the training reference mean.
    pub center: Option<f64>,
    /// Fixed spread; defaults to `spread_multiplier * std(reference)`.
    pub spread: Option<f64>,
    /// Multiple of the reference standard deviation used as spread.
    pub spread_multiplier: f64,
}

impl Default for DriftScorer {
    fn default() -> Self {
        Self {
            max_features: DEFAULT_MAX_FEATURES,
            center: None,
            spread: None,
            spread_multiplier: 1.0,
        }
    }
}

impl DriftScorer {
    /// Fit clock weights on a training partition.
    ///
    /// Same seed, same matrix and same reference times give bit-identical
    /// weights.
    ///
    /// # Errors
    ///
    /// - `InsufficientFeatures` if there is no candidate column or the cap is 0
    /// - `SchemaError` if `reference_times` does not match the row count
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(
        &self,
        x: &FeatureMatrix,
        reference_times: &[f64],
        seed: u64,
    ) -> Result<ClockWeights> {
        let selected_count = self.max_features.min(x.n_cols());
        if selected_count == 0 {
            return Err(Error::InsufficientFeatures(format!(
                "clock needs at least one candidate column (available {}, cap {})",
                x.n_cols(),
                self.max_features
            )));
        }
        if reference_times.len() != x.n_rows() {
            return Err(Error::schema(
                "reference_time",
                format!("expected {} values, got {}", x.n_rows(), reference_times.len()),
            ));
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        let mut selected = index::sample(&mut rng, x.n_cols(), selected_count).into_vec();
        selected.sort_unstable();
        let coefficients: Vec<f64> = selected.iter().map(|_| rng.gen_range(-1.0..1.0)).collect();

        let mut weights = ClockWeights {
            features: selected.iter().map(|&j| x.columns()[j].clone()).collect(),
            coefficients,
            intercept: 0.0,
            mean: 0.0,
            std: 0.0,
            center: 0.0,
            spread: 0.0,
        };

        let raw = raw_scores(x, &selected, &weights);
        let (mean, std) = mean_std(&raw);
        let (ref_mean, ref_std) = mean_std(reference_times);
        weights.mean = mean;
        weights.std = std;
        weights.center = self.center.unwrap_or(ref_mean);
        weights.spread = self.spread.unwrap_or(self.spread_multiplier * ref_std);

        debug!(
            selected = weights.features.len(),
            center = weights.center,
            spread = weights.spread,
            "clock fitted"
        );
        Ok(weights)
    }

    /// Score samples with fitted weights.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if a selected column is absent from `x` or the
    /// reference times do not match the row count.
    pub fn score(
        x: &FeatureMatrix,
        reference_times: &[f64],
        weights: &ClockWeights,
    ) -> Result<ClockScores> {
        if reference_times.len() != x.n_rows() {
            return Err(Error::schema(
                "reference_time",
                format!("expected {} values, got {}", x.n_rows(), reference_times.len()),
            ));
        }
        let positions = weights
            .features
            .iter()
            .map(|name| {
                x.column_index(name)
                    .ok_or_else(|| Error::schema(name, "clock feature missing from matrix"))
            })
            .collect::<Result<Vec<_>>>()?;

        let raw = raw_scores(x, &positions, weights);
        let normalized: Vec<f64> = raw
            .iter()
            .map(|r| (r - weights.mean) / (weights.std + NORMALIZATION_EPSILON))
            .collect();
        let clock_time: Vec<f64> = normalized
            .iter()
            .map(|z| weights.spread.mul_add(*z, weights.center))
            .collect();
        let drift = clock_time
            .iter()
            .zip(reference_times)
            .map(|(c, r)| c - r)
            .collect();
        Ok(ClockScores {
            raw,
            normalized,
            clock_time,
            drift,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn raw_scores(x: &FeatureMatrix, positions: &[usize], weights: &ClockWeights) -> Vec<f64> {
    let denom = positions.len() as f64;
    (0..x.n_rows())
        .map(|i| {
            let row = x.row(i);
            let dot: f64 = positions
                .iter()
                .zip(&weights.coefficients)
                .map(|(&j, w)| row[j] * w)
                .sum();
            dot / denom + weights.intercept
        })
        .collect()
}

/// Population mean and standard deviation.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
