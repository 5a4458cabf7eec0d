//! Metric Record - one row of the canonical long-form metrics table

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Closed set of reported metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Area under the ROC curve.
    Auc,
    /// Average precision.
    PrAuc,
    /// Mean squared error of probabilities.
    Brier,
    /// Mean negative log-likelihood.
    Logloss,
    /// Best sensitivity at specificity >= 0.9.
    SensAt90sp,
    /// Calibration slope.
    CalSlope,
    /// Calibration intercept.
    CalIntercept,
    /// Coefficient of determination.
    R2,
    /// Mean absolute error.
    Mae,
}

impl Metric {
    /// Every metric, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Auc,
        Self::PrAuc,
        Self::Brier,
        Self::Logloss,
        Self::SensAt90sp,
        Self::CalSlope,
        Self::CalIntercept,
        Self::R2,
        Self::Mae,
    ];

    /// Canonical column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auc => "auc",
            Self::PrAuc => "pr_auc",
            Self::Brier => "brier",
            Self::Logloss => "logloss",
            Self::SensAt90sp => "sens_at_90sp",
            Self::CalSlope => "cal_slope",
            Self::CalIntercept => "cal_intercept",
            Self::R2 => "r2",
            Self::Mae => "mae",
        }
    }

    /// Whether the metric only makes sense for a binary outcome.
    #[must_use]
    pub const fn requires_binary_outcome(self) -> bool {
        matches!(
            self,
            Self::Auc | Self::PrAuc | Self::Brier | Self::Logloss | Self::SensAt90sp
        )
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::schema("metric", format!("unknown metric `{s}`")))
    }
}

/// Fold identifier: a numbered outer fold or the cross-fold summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FoldId {
    /// Outer fold index (0-based).
    Index(usize),
    /// Aggregate across folds.
    Overall,
}

impl FoldId {
    /// Numeric index, if any.
    #[must_use]
    pub const fn index(self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(i),
            Self::Overall => None,
        }
    }
}

impl fmt::Display for FoldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "{i}"),
            Self::Overall => f.write_str("overall"),
        }
    }
}

impl Ord for FoldId {
    /// Numeric folds ascending, `Overall` last.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Index(a), Self::Index(b)) => a.cmp(b),
            (Self::Index(_), Self::Overall) => Ordering::Less,
            (Self::Overall, Self::Index(_)) => Ordering::Greater,
            (Self::Overall, Self::Overall) => Ordering::Equal,
        }
    }
}

impl PartialOrd for FoldId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One metric value for a run, fold and optional subgroup.
///
/// Records are append-only: there are no setters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    run_id: String,
    fold: FoldId,
    metric: Metric,
    value: f64,
    subgroup: Option<String>,
    n: Option<usize>,
    ci_low: Option<f64>,
    ci_high: Option<f64>,
    notes: Option<String>,
}

impl MetricRecord {
    /// Create a record with only the required fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>, fold: FoldId, metric: Metric, value: f64) -> Self {
        MetricRecordBuilder::new(run_id, fold, metric, value).build()
    }

    /// Create a builder for constructing a record with optional fields.
    #[must_use]
    pub fn builder(
        run_id: impl Into<String>,
        fold: FoldId,
        metric: Metric,
        value: f64,
    ) -> MetricRecordBuilder {
        MetricRecordBuilder::new(run_id, fold, metric, value)
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the fold.
    #[must_use]
    pub const fn fold(&self) -> FoldId {
        self.fold
    }

    /// Get the metric.
    #[must_use]
    pub const fn metric(&self) -> Metric {
        self.metric
    }

    /// Get the value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the subgroup tag, if the row is a subgroup slice.
    #[must_use]
    pub fn subgroup(&self) -> Option<&str> {
        self.subgroup.as_deref()
    }

    /// Get the sample count behind the value.
    #[must_use]
    pub const fn n(&self) -> Option<usize> {
        self.n
    }

    /// Get the lower confidence bound.
    #[must_use]
    pub const fn ci_low(&self) -> Option<f64> {
        self.ci_low
    }

    /// Get the upper confidence bound.
    #[must_use]
    pub const fn ci_high(&self) -> Option<f64> {
        self.ci_high
    }

    /// Get the free-text note.
    #[must_use]
    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    /// Canonical table order: run, fold, metric name, subgroup (none first).
    #[must_use]
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.run_id
            .cmp(&other.run_id)
            .then(self.fold.cmp(&other.fold))
            .then(self.metric.as_str().cmp(other.metric.as_str()))
            .then(self.subgroup.cmp(&other.subgroup))
    }
}

/// Builder for `MetricRecord`.
#[derive(Debug)]
pub struct MetricRecordBuilder {
    record: MetricRecord,
}

impl MetricRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>, fold: FoldId, metric: Metric, value: f64) -> Self {
        Self {
            record: MetricRecord {
                run_id: run_id.into(),
                fold,
                metric,
                value,
                subgroup: None,
                n: None,
                ci_low: None,
                ci_high: None,
                notes: None,
            },
        }
    }

    /// Set the subgroup tag.
    #[must_use]
    pub fn subgroup(mut self, subgroup: impl Into<String>) -> Self {
        self.record.subgroup = Some(subgroup.into());
        self
    }

    /// Set an optional subgroup tag.
    #[must_use]
    pub fn maybe_subgroup(mut self, subgroup: Option<String>) -> Self {
        self.record.subgroup = subgroup;
        self
    }

    /// Set the sample count.
    #[must_use]
    pub const fn n(mut self, n: usize) -> Self {
        self.record.n = Some(n);
        self
    }

    /// Set the confidence interval.
    #[must_use]
    pub const fn ci(mut self, low: f64, high: f64) -> Self {
        self.record.ci_low = Some(low);
        self.record.ci_high = Some(high);
        self
    }

    /// Set the note.
    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.record.notes = Some(notes.into());
        self
    }

    /// Build the `MetricRecord`.
    #[must_use]
    pub fn build(self) -> MetricRecord {
        self.record
    }
}
