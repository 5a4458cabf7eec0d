//! Elastic-net linear and logistic regression by coordinate descent
//!
//! Objective (Gaussian):
//!
//! ```text
//! 1/(2n) * ||y - b - Xw||^2 + alpha * (l1_ratio * ||w||_1 + (1 - l1_ratio)/2 * ||w||^2)
//! ```
//!
//! The binomial family replaces the squared loss with the mean negative
//! log-likelihood and is solved by iteratively reweighted least squares,
//! each step a weighted coordinate-descent pass (glmnet-style).
//!
//! Inputs are expected to be standardized (see `data::prep::Standardizer`);
//! the intercept is never penalized.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Response family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    /// Continuous response, identity link.
    Gaussian,
    /// Binary response in {0, 1}, logit link.
    Binomial,
}

/// One point of the hyperparameter grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    /// Overall penalty strength.
    pub alpha: f64,
    /// L1 share of the penalty, in [0, 1].
    pub l1_ratio: f64,
}

impl Penalty {
    /// Create a penalty.
    #[must_use]
    pub const fn new(alpha: f64, l1_ratio: f64) -> Self {
        Self { alpha, l1_ratio }
    }
}

/// Solver limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Coordinate-descent sweeps per (inner) solve.
    pub max_iter: usize,
    /// Stop when the largest coefficient change falls below this.
    pub tol: f64,
    /// IRLS steps for the binomial family.
    pub max_irls_iter: usize,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iter: 10_000,
            tol: 1e-6,
            max_irls_iter: 100,
        }
    }
}

/// Floor on IRLS weights so saturated rows keep the system well-posed.
const MIN_IRLS_WEIGHT: f64 = 1e-5;

/// Linear predictor clamp before the logistic link.
const MAX_ETA: f64 = 30.0;

/// Fitted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElasticNet {
    family: Family,
    penalty: Penalty,
    coefficients: Vec<f64>,
    intercept: f64,
}

impl ElasticNet {
    /// Fit on row-major standardized features.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a negative alpha or an l1 ratio outside
    /// [0, 1], and `SchemaError` for ragged input or an empty training set.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        family: Family,
        penalty: Penalty,
        options: &SolverOptions,
    ) -> Result<Self> {
        if !(penalty.alpha.is_finite() && penalty.alpha >= 0.0) {
            return Err(Error::config("alpha", format!("must be >= 0, got {}", penalty.alpha)));
        }
        if !(0.0..=1.0).contains(&penalty.l1_ratio) {
            return Err(Error::config(
                "l1_ratio",
                format!("must be in [0, 1], got {}", penalty.l1_ratio),
            ));
        }
        if x.is_empty() || x.len() != y.len() {
            return Err(Error::schema(
                "target",
                format!("{} rows of features for {} targets", x.len(), y.len()),
            ));
        }
        let width = x[0].len();
        if x.iter().any(|row| row.len() != width) {
            return Err(Error::schema("features", "ragged feature rows"));
        }

        let (coefficients, intercept) = match family {
            Family::Gaussian => {
                let weights = vec![1.0; y.len()];
                weighted_descent(x, y, &weights, penalty, options, vec![0.0; width])
            }
            Family::Binomial => irls(x, y, penalty, options),
        };
        Ok(Self {
            family,
            penalty,
            coefficients,
            intercept,
        })
    }

    /// Linear predictor `b + x.w`.
    #[must_use]
    pub fn decision(&self, row: &[f64]) -> f64 {
        self.intercept
            + row
                .iter()
                .zip(&self.coefficients)
                .map(|(x, w)| x * w)
                .sum::<f64>()
    }

    /// Prediction on the response scale (probability for binomial).
    #[must_use]
    pub fn predict_one(&self, row: &[f64]) -> f64 {
        let eta = self.decision(row);
        match self.family {
            Family::Gaussian => eta,
            Family::Binomial => sigmoid(eta),
        }
    }

    /// Predictions for every row.
    #[must_use]
    pub fn predict(&self, x: &[Vec<f64>]) -> Vec<f64> {
        x.iter().map(|row| self.predict_one(row)).collect()
    }

    /// Fitted coefficients (standardized scale).
    #[must_use]
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    /// Fitted intercept.
    #[must_use]
    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Penalty used for the fit.
    #[must_use]
    pub const fn penalty(&self) -> Penalty {
        self.penalty
    }
}

/// Logistic link with a clamped argument.
#[must_use]
pub fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta.clamp(-MAX_ETA, MAX_ETA)).exp())
}

fn soft_threshold(z: f64, gamma: f64) -> f64 {
    if z > gamma {
        z - gamma
    } else if z < -gamma {
        z + gamma
    } else {
        0.0
    }
}

/// Weighted coordinate descent with an unpenalized intercept.
#[allow(clippy::cast_precision_loss)]
fn weighted_descent(
    x: &[Vec<f64>],
    y: &[f64],
    weights: &[f64],
    penalty: Penalty,
    options: &SolverOptions,
    mut w: Vec<f64>,
) -> (Vec<f64>, f64) {
    let n = y.len() as f64;
    let p = w.len();
    let l1 = penalty.alpha * penalty.l1_ratio;
    let l2 = penalty.alpha * (1.0 - penalty.l1_ratio);
    let weight_sum: f64 = weights.iter().sum();

    let curvature: Vec<f64> = (0..p)
        .map(|j| {
            x.iter()
                .zip(weights)
                .map(|(row, v)| v * row[j] * row[j])
                .sum::<f64>()
                / n
        })
        .collect();

    let mut residual: Vec<f64> = x
        .iter()
        .zip(y)
        .map(|(row, yi)| yi - row.iter().zip(&w).map(|(a, b)| a * b).sum::<f64>())
        .collect();
    let mut b = 0.0;

    for _ in 0..options.max_iter {
        let mut max_delta: f64 = 0.0;

        let b_new = residual
            .iter()
            .zip(weights)
            .map(|(r, v)| v * (r + b))
            .sum::<f64>()
            / weight_sum;
        let delta_b = b_new - b;
        if delta_b != 0.0 {
            for r in &mut residual {
                *r -= delta_b;
            }
            b = b_new;
            max_delta = max_delta.max(delta_b.abs());
        }

        for j in 0..p {
            if curvature[j] <= f64::EPSILON {
                continue;
            }
            let rho = x
                .iter()
                .zip(&residual)
                .zip(weights)
                .map(|((row, r), v)| v * row[j] * r)
                .sum::<f64>()
                / n
                + curvature[j] * w[j];
            let updated = soft_threshold(rho, l1) / (curvature[j] + l2);
            let delta = updated - w[j];
            if delta != 0.0 {
                for (r, row) in residual.iter_mut().zip(x) {
                    *r -= row[j] * delta;
                }
                w[j] = updated;
                max_delta = max_delta.max(delta.abs());
            }
        }

        if max_delta < options.tol {
            break;
        }
    }
    (w, b)
}

fn irls(x: &[Vec<f64>], y: &[f64], penalty: Penalty, options: &SolverOptions) -> (Vec<f64>, f64) {
    let p = x[0].len();
    let mut w = vec![0.0; p];
    let mut b = 0.0;

    for _ in 0..options.max_irls_iter {
        let mut weights = Vec::with_capacity(y.len());
        let mut working = Vec::with_capacity(y.len());
        for (row, yi) in x.iter().zip(y) {
            let eta = b + row.iter().zip(&w).map(|(a, c)| a * c).sum::<f64>();
            let mu = sigmoid(eta);
            let v = (mu * (1.0 - mu)).max(MIN_IRLS_WEIGHT);
            weights.push(v);
            // Descent warm-starts from w; the intercept is re-estimated
            // on its first sweep.
            working.push(eta + (yi - mu) / v);
        }
        let (w_new, b_new) = weighted_descent(x, &working, &weights, penalty, options, w.clone());
        let change = w_new
            .iter()
            .zip(&w)
            .map(|(a, c)| (a - c).abs())
            .fold((b_new - b).abs(), f64::max);
        w = w_new;
        b = b_new;
        if change < options.tol {
            break;
        }
    }
    (w, b)
}
