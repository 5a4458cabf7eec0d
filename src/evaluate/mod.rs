//! Nested cross-validation with isotonic calibration
//!
//! Per outer fold:
//!
//! ```text
//! OuterSplit -> InnerCV (grid search) -> Refit -> Calibrate -> Score
//! ```
//!
//! Each fold owns its partition, its clock weights, its standardizer and
//! its calibration curve; nothing fitted is shared across folds. Outer
//! folds run in parallel under the `rayon` feature and are collected in
//! fold order, so results do not depend on scheduling.

pub mod folds;
pub mod metrics;

use std::collections::BTreeMap;

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::clock::DriftScorer;
use crate::config::{ClockConfig, PipelineConfig, Task};
use crate::data::prep::Standardizer;
use crate::data::FeatureMatrix;
use crate::experiment::{FoldId, Metric, MetricRecord};
use crate::model::{ElasticNet, IsotonicCalibrator, Penalty, SolverOptions};
use crate::{Error, Result};

use self::folds::{assign_folds, split, Strata};

/// Mixed into fold seeds to separate the inner-split stream.
const INNER_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Everything the evaluator needs, aligned by row.
#[derive(Debug, Clone)]
pub struct Dataset {
    ids: Vec<String>,
    features: FeatureMatrix,
    clock_candidates: Option<FeatureMatrix>,
    reference_times: Vec<f64>,
    targets: Vec<f64>,
    subgroups: Vec<Vec<String>>,
}

impl Dataset {
    /// Assemble and check row alignment.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` naming the first misaligned input.
    pub fn new(
        ids: Vec<String>,
        features: FeatureMatrix,
        clock_candidates: Option<FeatureMatrix>,
        reference_times: Vec<f64>,
        targets: Vec<f64>,
        subgroups: Vec<Vec<String>>,
    ) -> Result<Self> {
        let n = ids.len();
        let check = |name: &str, len: usize| {
            if len == n {
                Ok(())
            } else {
                Err(Error::schema(name, format!("expected {n} rows, got {len}")))
            }
        };
        check("features", features.n_rows())?;
        if let Some(c) = &clock_candidates {
            check("clock_candidates", c.n_rows())?;
        }
        check("reference_time", reference_times.len())?;
        check("target", targets.len())?;
        check("subgroups", subgroups.len())?;
        Ok(Self {
            ids,
            features,
            clock_candidates,
            reference_times,
            targets,
            subgroups,
        })
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn has_subgroups(&self) -> bool {
        self.subgroups.iter().any(|tags| !tags.is_empty())
    }

    fn gather(values: &[f64], rows: &[usize]) -> Vec<f64> {
        rows.iter().map(|&i| values[i]).collect()
    }
}

/// Held-out prediction for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Sample identifier.
    pub sample_id: String,
    /// Outer fold that held the sample out.
    pub fold: usize,
    /// Observed target.
    pub observed: f64,
    /// Model output before calibration.
    pub raw: f64,
    /// Model output after calibration.
    pub calibrated: f64,
}

/// A metric that could not be computed on a fold slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Omission {
    /// Metric left out.
    pub metric: Metric,
    /// Subgroup slice, `None` for the whole held-out partition.
    pub subgroup: Option<String>,
    /// Why the metric is undefined on this slice.
    pub reason: String,
}

/// Result of one outer fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldOutcome {
    /// Fold index.
    pub fold: usize,
    /// Penalty chosen by the inner search.
    pub penalty: Penalty,
    /// Held-out predictions in sample order.
    pub predictions: Vec<Prediction>,
    /// Metric rows (whole partition and subgroup slices).
    pub records: Vec<MetricRecord>,
    /// Metrics left out on this fold.
    pub omissions: Vec<Omission>,
}

/// Result of a full nested cross-validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// One outcome per outer fold, in fold order.
    pub folds: Vec<FoldOutcome>,
}

impl Evaluation {
    /// Every per-fold record, in fold order.
    #[must_use]
    pub fn records(&self) -> Vec<MetricRecord> {
        self.folds
            .iter()
            .flat_map(|f| f.records.iter().cloned())
            .collect()
    }

    /// Every held-out prediction, in fold order.
    #[must_use]
    pub fn predictions(&self) -> Vec<Prediction> {
        self.folds
            .iter()
            .flat_map(|f| f.predictions.iter().cloned())
            .collect()
    }

    /// One note per metric omitted on at least one fold (whole-partition
    /// slices only), e.g. `auc omitted in folds [1, 3]: no positive cases`.
    #[must_use]
    pub fn omission_notes(&self) -> Vec<(Metric, String)> {
        let mut by_metric: BTreeMap<&'static str, (Metric, Vec<usize>, Vec<&str>)> =
            BTreeMap::new();
        for fold in &self.folds {
            for o in fold.omissions.iter().filter(|o| o.subgroup.is_none()) {
                let entry = by_metric
                    .entry(o.metric.as_str())
                    .or_insert_with(|| (o.metric, Vec::new(), Vec::new()));
                entry.1.push(fold.fold);
                if !entry.2.contains(&o.reason.as_str()) {
                    entry.2.push(o.reason.as_str());
                }
            }
        }
        by_metric
            .into_values()
            .map(|(metric, folds, reasons)| {
                (
                    metric,
                    format!("{metric} omitted in folds {folds:?}: {}", reasons.join(", ")),
                )
            })
            .collect()
    }
}

/// Nested cross-validation driver.
#[derive(Debug, Clone)]
pub struct TrainEvaluate {
    run_id: String,
    seed: u64,
    task: Task,
    outer_folds: usize,
    inner_folds: usize,
    grid: Vec<Penalty>,
    solver: SolverOptions,
    clock: ClockConfig,
    calibrate: bool,
    zscore_clip: Option<f64>,
    metrics: Vec<Metric>,
}

impl TrainEvaluate {
    /// Capture the settings this stage needs.
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            run_id: config.run_id.clone(),
            seed: config.seed,
            task: config.task,
            outer_folds: config.cv.outer_folds,
            inner_folds: config.cv.inner_folds,
            grid: config.elastic_net.grid.clone(),
            solver: config.elastic_net.solver,
            clock: config.clock.clone(),
            calibrate: config.calibrate,
            zscore_clip: config.prep.zscore_clip,
            metrics: config.resolved_metrics(),
        }
    }

    /// Run every outer fold.
    ///
    /// # Errors
    ///
    /// Fatal conditions only: too few samples for the fold counts, no
    /// usable feature, clock schema problems. Degenerate metrics are
    /// recorded as omissions.
    pub fn run(&self, data: &Dataset) -> Result<Evaluation> {
        let subgroup_keys: Vec<String>;
        let strata = if data.has_subgroups() {
            subgroup_keys = data.subgroups.iter().map(|tags| tags.join("|")).collect();
            Strata::Keys(&subgroup_keys)
        } else {
            Strata::Quantile(&data.reference_times)
        };
        let assignment = assign_folds(strata, self.outer_folds, self.seed)?;
        info!(
            samples = data.len(),
            folds = self.outer_folds,
            grid = self.grid.len(),
            "starting nested cross-validation"
        );

        let fold_ids: Vec<usize> = (0..self.outer_folds).collect();
        #[cfg(feature = "rayon")]
        let folds = fold_ids
            .par_iter()
            .map(|&fold| self.run_fold(data, &assignment, fold))
            .collect::<Result<Vec<_>>>()?;
        #[cfg(not(feature = "rayon"))]
        let folds = fold_ids
            .iter()
            .map(|&fold| self.run_fold(data, &assignment, fold))
            .collect::<Result<Vec<_>>>()?;

        Ok(Evaluation { folds })
    }

    fn run_fold(&self, data: &Dataset, assignment: &[usize], fold: usize) -> Result<FoldOutcome> {
        let _span = info_span!("fold", fold).entered();
        let fold_seed = self.seed ^ fold as u64;
        let (train, test) = split(assignment, fold);

        let mut x_train = data.features.select_rows(&train);
        let mut x_test = data.features.select_rows(&test);
        if let (true, Some(candidates)) = (self.clock.enabled, &data.clock_candidates) {
            let ref_train = Dataset::gather(&data.reference_times, &train);
            let ref_test = Dataset::gather(&data.reference_times, &test);
            let c_train = candidates.select_rows(&train);
            let fill = Standardizer::fit(&c_train, None);
            let c_test = fill.impute(&candidates.select_rows(&test));
            let c_train = fill.impute(&c_train);
            let weights = self.clock.scorer.fit(&c_train, &ref_train, self.clock.seed)?;
            let drift_train = DriftScorer::score(&c_train, &ref_train, &weights)?.drift;
            let drift_test = DriftScorer::score(&c_test, &ref_test, &weights)?.drift;
            x_train = x_train.with_column(&self.clock.feature_name, &drift_train)?;
            x_test = x_test.with_column(&self.clock.feature_name, &drift_test)?;
        }
        if x_train.n_cols() == 0 {
            return Err(Error::InsufficientFeatures(
                "model has no feature columns".to_string(),
            ));
        }

        let y_train = Dataset::gather(&data.targets, &train);
        let y_test = Dataset::gather(&data.targets, &test);

        let penalty = self.select_penalty(&x_train, &y_train, fold_seed)?;
        debug!(alpha = penalty.alpha, l1_ratio = penalty.l1_ratio, "inner search done");

        let scaler = Standardizer::fit(&x_train, self.zscore_clip);
        let z_train = scaler.transform(&x_train);
        let z_test = scaler.transform(&x_test);
        let model = ElasticNet::fit(&z_train, &y_train, self.task.family(), penalty, &self.solver)?;
        let raw_train = model.predict(&z_train);
        let raw_test = model.predict(&z_test);

        let calibrated = if self.calibrate {
            IsotonicCalibrator::fit(&raw_train, &y_train).apply_all(&raw_test)
        } else {
            raw_test.clone()
        };

        let predictions = test
            .iter()
            .enumerate()
            .map(|(j, &i)| Prediction {
                sample_id: data.ids[i].clone(),
                fold,
                observed: y_test[j],
                raw: raw_test[j],
                calibrated: calibrated[j],
            })
            .collect();

        let (records, omissions) = self.score(data, fold, &test, &y_test, &calibrated);
        info!(
            train = train.len(),
            test = test.len(),
            records = records.len(),
            omitted = omissions.len(),
            "fold complete"
        );
        Ok(FoldOutcome {
            fold,
            penalty,
            predictions,
            records,
            omissions,
        })
    }

    /// Inner K'-fold grid search; the first grid point with the lowest mean
    /// validation loss wins.
    #[allow(clippy::cast_precision_loss)]
    fn select_penalty(&self, x: &FeatureMatrix, y: &[f64], fold_seed: u64) -> Result<Penalty> {
        let label_keys: Vec<String>;
        let strata = match self.task {
            Task::Classification => {
                label_keys = y.iter().map(|v| format!("{v}")).collect();
                Strata::Keys(&label_keys)
            }
            Task::Regression => Strata::Quantile(y),
        };
        let inner_seed = fold_seed.rotate_left(17) ^ INNER_STREAM;
        let assignment = assign_folds(strata, self.inner_folds, inner_seed)?;

        let splits: Vec<(Vec<Vec<f64>>, Vec<f64>, Vec<Vec<f64>>, Vec<f64>)> = (0..self.inner_folds)
            .map(|inner| {
                let (fit_rows, val_rows) = split(&assignment, inner);
                let x_fit = x.select_rows(&fit_rows);
                let scaler = Standardizer::fit(&x_fit, self.zscore_clip);
                (
                    scaler.transform(&x_fit),
                    Dataset::gather(y, &fit_rows),
                    scaler.transform(&x.select_rows(&val_rows)),
                    Dataset::gather(y, &val_rows),
                )
            })
            .collect();

        let criterion = match self.task {
            Task::Classification => Metric::Logloss,
            Task::Regression => Metric::Mae,
        };
        let mut best: Option<(f64, Penalty)> = None;
        for penalty in &self.grid {
            let mut total = 0.0;
            for (z_fit, y_fit, z_val, y_val) in &splits {
                let model = ElasticNet::fit(z_fit, y_fit, self.task.family(), *penalty, &self.solver)?;
                total += metrics::compute(criterion, y_val, &model.predict(z_val), false)
                    .ok()
                    .filter(|loss| loss.is_finite())
                    .unwrap_or(f64::INFINITY);
            }
            let mean = total / splits.len() as f64;
            if best.map_or(true, |(b, _)| mean < b) {
                best = Some((mean, *penalty));
            }
        }
        best.map(|(_, p)| p)
            .ok_or_else(|| Error::config("elastic_net.grid", "must not be empty"))
    }

    fn score(
        &self,
        data: &Dataset,
        fold: usize,
        test: &[usize],
        observed: &[f64],
        predicted: &[f64],
    ) -> (Vec<MetricRecord>, Vec<Omission>) {
        let mut slices: Vec<(Option<String>, Vec<usize>)> = vec![(None, (0..test.len()).collect())];
        let mut by_tag: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (j, &i) in test.iter().enumerate() {
            for tag in &data.subgroups[i] {
                by_tag.entry(tag.as_str()).or_default().push(j);
            }
        }
        slices.extend(by_tag.into_iter().map(|(tag, rows)| (Some(tag.to_string()), rows)));

        let binary = self.task == Task::Classification;
        let mut records = Vec::new();
        let mut omissions = Vec::new();
        for (subgroup, rows) in slices {
            let y = Dataset::gather(observed, &rows);
            let p = Dataset::gather(predicted, &rows);
            for &metric in &self.metrics {
                match metrics::compute(metric, &y, &p, binary) {
                    Ok(value) => records.push(
                        MetricRecord::builder(&self.run_id, FoldId::Index(fold), metric, value)
                            .maybe_subgroup(subgroup.clone())
                            .n(rows.len())
                            .build(),
                    ),
                    Err(undefined) => {
                        let condition = Error::DegenerateFold {
                            fold,
                            metric: metric.as_str().to_string(),
                            reason: undefined.0.to_string(),
                        };
                        if subgroup.is_none() {
                            warn!(%condition, "metric omitted");
                        } else {
                            debug!(%condition, subgroup = subgroup.as_deref(), "subgroup metric omitted");
                        }
                        omissions.push(Omission {
                            metric,
                            subgroup: subgroup.clone(),
                            reason: undefined.0.to_string(),
                        });
                    }
                }
            }
        }
        (records, omissions)
    }
}
