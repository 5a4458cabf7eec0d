//! One end-to-end run
//!
//! ```text
//! samples -> KineticsModel -> feature matrix (+ clock candidates)
//!         -> TrainEvaluate -> MetricsAggregator -> MetricsTable
//! ```
//!
//! A fatal error aborts the run with no table; [`Pipeline::run_with_record`]
//! still returns the failed [`RunRecord`]. Sample-level and fold-level
//! conditions surface as notes on the overall rows.

use std::collections::BTreeSet;
use std::path::Path;

use tracing::{error, info, warn};

use crate::config::{PipelineConfig, Task};
use crate::data::prep::retain_dense_features;
use crate::data::{FeatureMatrix, Sample};
use crate::evaluate::{Dataset, Evaluation, Prediction, TrainEvaluate};
use crate::experiment::{MetricsAggregator, MetricsTable, RunRecord};
use crate::kinetics::{ExcludedSample, KineticsModel};
use crate::model::Penalty;
use crate::storage::StorageEngine;
use crate::{Error, Result};

/// Everything a successful run produces.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Lifecycle record (status, timestamps, sample counts).
    pub run: RunRecord,
    /// Canonical long-form metrics table.
    pub table: MetricsTable,
    /// Held-out predictions, in fold order.
    pub predictions: Vec<Prediction>,
    /// Samples dropped by the kinetics stage.
    pub excluded: Vec<ExcludedSample>,
    /// Penalty chosen on each outer fold.
    pub penalties: Vec<Penalty>,
    /// Model feature columns, before the per-fold drift column.
    pub features: Vec<String>,
}

impl RunReport {
    /// Write the metrics table to Parquet.
    ///
    /// # Errors
    ///
    /// Returns `Arrow` or `StorageError` if encoding or writing fails.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        StorageEngine::new(vec![self.table.to_record_batch()?]).save_parquet(path)
    }
}

/// Configured run driver.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Validate the configuration and build the driver.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Decode the stored table and run.
    ///
    /// The outcome column is only required for classification; a regression
    /// table may leave it out.
    ///
    /// # Errors
    ///
    /// As [`StorageEngine::to_samples`] and [`run`](Self::run).
    pub fn run_storage(&self, storage: &StorageEngine) -> Result<RunReport> {
        let mut columns = self.config.columns.clone();
        if self.config.task == Task::Regression
            && columns
                .outcome
                .as_deref()
                .is_some_and(|name| !storage.has_column(name))
        {
            columns.outcome = None;
        }
        let samples = storage.to_samples(&columns)?;
        self.run(&samples)
    }

    /// Run on in-memory samples.
    ///
    /// # Errors
    ///
    /// Any fatal condition: schema problems, invalid kinetics parameters,
    /// no usable feature, fewer samples than folds.
    pub fn run(&self, samples: &[Sample]) -> Result<RunReport> {
        self.run_with_record(samples).1
    }

    /// Run on in-memory samples and hand back the lifecycle record whatever
    /// the outcome. On failure the record is `Failed` and carries the
    /// rendered error.
    #[must_use]
    pub fn run_with_record(&self, samples: &[Sample]) -> (RunRecord, Result<RunReport>) {
        let mut run = RunRecord::new(&self.config.run_id, self.config.seed);
        run.start();
        info!(run_id = %self.config.run_id, samples = samples.len(), "run started");

        let result = self.execute(samples, &mut run);
        if let Err(e) = &result {
            run.fail(e.to_string());
            error!(run_id = %self.config.run_id, error = %e, "run failed");
        }
        (run, result)
    }

    fn execute(&self, samples: &[Sample], run: &mut RunRecord) -> Result<RunReport> {
        self.check_samples(samples)?;

        let kinetics = self.config.kinetics.as_ref();
        let mut candidates = self.candidate_columns(samples);
        if let Some(k) = kinetics {
            candidates.retain(|c| *c != k.concentration_column);
        }

        let (kept, estimates, excluded) = match kinetics {
            Some(k) => {
                let model = KineticsModel::new(k.parameters)?;
                let estimates = model.estimate_samples(samples, &k.concentration_column)?;
                let mut kept = Vec::with_capacity(samples.len());
                let mut values = Vec::with_capacity(samples.len());
                for (sample, value) in samples.iter().zip(&estimates.values) {
                    if let Some(v) = value {
                        kept.push(sample.clone());
                        values.push(*v);
                    }
                }
                (kept, Some(values), estimates.excluded)
            }
            None => (samples.to_vec(), None, Vec::new()),
        };
        if !excluded.is_empty() {
            warn!(excluded = excluded.len(), "samples excluded by kinetics stage");
        }
        run.record_samples(kept.len(), excluded.len());

        let retained = retain_dense_features(
            &kept,
            &candidates,
            self.config.prep.max_missing_fraction,
        );
        let mut features = FeatureMatrix::from_samples(&kept, &retained)?;
        if let (Some(k), Some(values)) = (kinetics, &estimates) {
            features = features.with_column(&k.feature_name, values)?;
        }
        if features.n_cols() == 0 && !self.config.clock.enabled {
            return Err(Error::InsufficientFeatures(format!(
                "no feature column survives the missing-fraction threshold {}",
                self.config.prep.max_missing_fraction
            )));
        }

        let clock_candidates = if self.config.clock.enabled {
            let columns = self
                .config
                .clock
                .candidate_columns
                .clone()
                .unwrap_or_else(|| retained.clone());
            Some(FeatureMatrix::from_samples(&kept, &columns)?)
        } else {
            None
        };

        let targets = match self.config.task {
            Task::Regression => kept.iter().map(Sample::reference_time).collect(),
            Task::Classification => kept
                .iter()
                .map(|s| if s.outcome() == Some(true) { 1.0 } else { 0.0 })
                .collect(),
        };
        let model_features = features.columns().to_vec();
        let dataset = Dataset::new(
            kept.iter().map(|s| s.id().to_string()).collect(),
            features,
            clock_candidates,
            kept.iter().map(Sample::reference_time).collect(),
            targets,
            kept.iter().map(Sample::subgroup_tags).collect(),
        )?;
        info!(
            samples = dataset.len(),
            features = model_features.len(),
            "dataset assembled"
        );

        let evaluation = TrainEvaluate::new(&self.config).run(&dataset)?;
        let table = self.aggregate(&evaluation, excluded.len());

        run.succeed();
        info!(run_id = %self.config.run_id, rows = table.len(), "run complete");
        Ok(RunReport {
            run: run.clone(),
            table,
            predictions: evaluation.predictions(),
            excluded,
            penalties: evaluation.folds.iter().map(|f| f.penalty).collect(),
            features: model_features,
        })
    }

    fn aggregate(&self, evaluation: &Evaluation, excluded: usize) -> MetricsTable {
        let mut aggregator = MetricsAggregator::new(self.config.aggregation, self.config.seed);
        if excluded > 0 {
            aggregator = aggregator.with_note(None, format!("excluded {excluded} samples"));
        }
        for (metric, note) in evaluation.omission_notes() {
            aggregator = aggregator.with_note(Some(metric), note);
        }
        aggregator.aggregate(&evaluation.records())
    }

    fn check_samples(&self, samples: &[Sample]) -> Result<()> {
        let columns = &self.config.columns;
        let mut seen = BTreeSet::new();
        for sample in samples {
            if !seen.insert(sample.id()) {
                return Err(Error::schema(
                    &columns.id,
                    format!("duplicate sample id {}", sample.id()),
                ));
            }
            let t = sample.reference_time();
            if !(t.is_finite() && t >= 0.0) {
                return Err(Error::schema(
                    &columns.target,
                    format!("sample {} has reference time {t}", sample.id()),
                ));
            }
            if self.config.task == Task::Classification && sample.outcome().is_none() {
                return Err(Error::schema(
                    columns.outcome.as_deref().unwrap_or("outcome"),
                    format!("missing for sample {}", sample.id()),
                ));
            }
        }
        Ok(())
    }

    fn candidate_columns(&self, samples: &[Sample]) -> Vec<String> {
        if let Some(features) = &self.config.columns.features {
            return features.clone();
        }
        let mut union = BTreeSet::new();
        for sample in samples {
            union.extend(sample.features().keys().cloned());
        }
        union.into_iter().collect()
    }
}
