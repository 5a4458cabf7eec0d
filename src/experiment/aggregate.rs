//! Metrics Aggregator - per-fold records into the canonical table
//!
//! ## Confidence intervals
//!
//! Overall rows carry the mean of the per-fold values and a percentile
//! bootstrap interval obtained by **resampling folds** with replacement
//! (`bootstrap_iterations` replicates of the fold-value mean). Samples are
//! never resampled here: the per-fold values are the unit of variation.
//! Bounds are widened to contain the mean, so `ci_low <= value <= ci_high`
//! holds for every emitted row.
//!
//! ## Subgroups
//!
//! Subgroup rows are emitted only when their sample count reaches
//! `min_subgroup_size`: per-fold rows on the fold's count, overall rows on
//! the count summed across folds. Rows below threshold are omitted, never
//! zero-filled.
//!
//! ## Notes
//!
//! A note aimed at a metric that has no overall row (every fold omitted it)
//! is carried on every whole-cohort overall row instead.

use std::collections::{BTreeMap, BTreeSet};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{FoldId, Metric, MetricRecord, MetricsTable};

/// Aggregation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Bootstrap replicates per overall row.
    pub bootstrap_iterations: usize,
    /// Two-sided confidence level.
    pub confidence: f64,
    /// Smallest subgroup sample count that gets a row.
    pub min_subgroup_size: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bootstrap_iterations: 1000,
            confidence: 0.95,
            min_subgroup_size: 10,
        }
    }
}

type GroupKey = (String, &'static str, Option<String>);

/// Reduces per-fold metric records into the canonical table.
#[derive(Debug, Clone)]
pub struct MetricsAggregator {
    config: AggregationConfig,
    seed: u64,
    notes: Vec<(Option<Metric>, String)>,
}

impl MetricsAggregator {
    /// Create an aggregator; `seed` drives the bootstrap.
    #[must_use]
    pub const fn new(config: AggregationConfig, seed: u64) -> Self {
        Self {
            config,
            seed,
            notes: Vec::new(),
        }
    }

    /// Attach a note to the overall row of one metric, or of every metric
    /// when `metric` is `None` or has no overall row.
    #[must_use]
    pub fn with_note(mut self, metric: Option<Metric>, note: impl Into<String>) -> Self {
        self.notes.push((metric, note.into()));
        self
    }

    /// Per-fold rows (subgroup-filtered) plus overall rows.
    #[must_use]
    pub fn aggregate(&self, per_fold: &[MetricRecord]) -> MetricsTable {
        let mut rows: Vec<MetricRecord> = per_fold
            .iter()
            .filter(|r| r.fold() != FoldId::Overall && self.keeps(r.subgroup(), r.n()))
            .cloned()
            .collect();
        rows.extend(self.overall_rows(per_fold));
        MetricsTable::from_records(rows)
    }

    /// Overall rows only.
    #[must_use]
    pub fn overall(&self, per_fold: &[MetricRecord]) -> MetricsTable {
        MetricsTable::from_records(self.overall_rows(per_fold))
    }

    fn keeps(&self, subgroup: Option<&str>, n: Option<usize>) -> bool {
        subgroup.is_none() || n.unwrap_or(0) >= self.config.min_subgroup_size
    }

    fn overall_rows(&self, per_fold: &[MetricRecord]) -> Vec<MetricRecord> {
        let mut groups: BTreeMap<GroupKey, (Metric, Vec<&MetricRecord>)> = BTreeMap::new();
        for record in per_fold.iter().filter(|r| r.fold() != FoldId::Overall) {
            let key = (
                record.run_id().to_string(),
                record.metric().as_str(),
                record.subgroup().map(str::to_string),
            );
            groups
                .entry(key)
                .or_insert_with(|| (record.metric(), Vec::new()))
                .1
                .push(record);
        }

        let reported: BTreeSet<&'static str> = groups
            .keys()
            .filter(|(_, _, subgroup)| subgroup.is_none())
            .map(|(_, metric, _)| *metric)
            .collect();

        let mut rows = Vec::with_capacity(groups.len());
        for (ordinal, ((run_id, _, subgroup), (metric, records))) in groups.into_iter().enumerate() {
            let n_total = records
                .iter()
                .filter_map(|r| r.n())
                .reduce(|a, b| a + b);
            if !self.keeps(subgroup.as_deref(), n_total) {
                debug!(
                    metric = metric.as_str(),
                    subgroup = subgroup.as_deref().unwrap_or(""),
                    n = n_total.unwrap_or(0),
                    "subgroup below minimum size, omitted"
                );
                continue;
            }

            let values: Vec<f64> = records.iter().map(|r| r.value()).collect();
            let (mean, low, high) = self.bootstrap_mean_ci(&values, ordinal as u64);

            let mut builder = MetricRecord::builder(run_id, FoldId::Overall, metric, mean)
                .maybe_subgroup(subgroup.clone())
                .ci(low, high);
            if let Some(n) = n_total {
                builder = builder.n(n);
            }
            if subgroup.is_none() {
                let notes: Vec<&str> = self
                    .notes
                    .iter()
                    .filter(|(m, _)| {
                        m.map_or(true, |m| m == metric || !reported.contains(m.as_str()))
                    })
                    .map(|(_, note)| note.as_str())
                    .collect();
                if !notes.is_empty() {
                    builder = builder.notes(notes.join("; "));
                }
            }
            rows.push(builder.build());
        }
        rows
    }

    /// Mean of `values` with a percentile bootstrap interval over resampled
    /// values. `stream` separates the random streams of different rows.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn bootstrap_mean_ci(&self, values: &[f64], stream: u64) -> (f64, f64, f64) {
        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let iters = self.config.bootstrap_iterations;
        if n < 2 || iters == 0 {
            return (mean, mean, mean);
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.seed ^ stream.rotate_left(32));
        let mut replicates = Vec::with_capacity(iters);
        for _ in 0..iters {
            let sum: f64 = (0..n).map(|_| values[rng.gen_range(0..n)]).sum();
            replicates.push(sum / n as f64);
        }
        replicates.sort_by(f64::total_cmp);

        let tail = (1.0 - self.config.confidence) / 2.0;
        let lo_idx = ((iters as f64 * tail).floor() as usize).min(iters - 1);
        let hi_idx = ((iters as f64 * (1.0 - tail)).floor() as usize).min(iters - 1);
        (
            mean,
            replicates[lo_idx].min(mean),
            replicates[hi_idx].max(mean),
        )
    }
}
