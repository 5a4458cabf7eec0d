//! Run configuration
//!
//! Everything the core consumes from the outside: seeds, fold counts, the
//! elastic-net grid, kinetics constants, clock settings, bootstrap and
//! subgroup thresholds. Deserialized from JSON; every field has a default.
//!
//! ```rust
//! use epiclock::config::{PipelineConfig, Task};
//!
//! let config = PipelineConfig::from_json_str(r#"{
//!     "run_id": "pilot",
//!     "seed": 7,
//!     "task": "classification",
//!     "cv": { "outer_folds": 4, "inner_folds": 3 }
//! }"#)?;
//! assert_eq!(config.cv.outer_folds, 4);
//! assert_eq!(config.task, Task::Classification);
//! # Ok::<(), epiclock::Error>(())
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clock::DriftScorer;
use crate::experiment::{AggregationConfig, Metric};
use crate::kinetics::KineticsParameters;
use crate::model::{Family, Penalty, SolverOptions};
use crate::{Error, Result};

/// What the elastic-net model predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Predict the reference time.
    Regression,
    /// Predict the binary outcome.
    #[default]
    Classification,
}

impl Task {
    /// Response family for the model.
    #[must_use]
    pub const fn family(self) -> Family {
        match self {
            Self::Regression => Family::Gaussian,
            Self::Classification => Family::Binomial,
        }
    }
}

/// Input table column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnConfig {
    /// Sample identifier column.
    pub id: String,
    /// Reference time column (the configured target).
    pub target: String,
    /// Temperature column (°C). When no temperature column is configured,
    /// samples default to 20 °C; a configured column must exist.
    pub temperature: Option<String>,
    /// Binary outcome column. Required for classification; regression
    /// tables may omit it.
    pub outcome: Option<String>,
    /// Categorical subgroup columns.
    pub subgroups: Vec<String>,
    /// Feature columns; `None` means every other numeric column.
    pub features: Option<Vec<String>>,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            id: "sample_id".to_string(),
            target: "age".to_string(),
            temperature: Some("temperature".to_string()),
            outcome: Some("outcome".to_string()),
            subgroups: Vec::new(),
            features: None,
        }
    }
}

/// Fold counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    /// Outer folds (generalization estimate).
    pub outer_folds: usize,
    /// Inner folds (hyperparameter search).
    pub inner_folds: usize,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            outer_folds: 5,
            inner_folds: 3,
        }
    }
}

/// Elastic-net search grid and solver limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticNetConfig {
    /// `(alpha, l1_ratio)` pairs searched in order; ties keep the earlier pair.
    pub grid: Vec<Penalty>,
    /// Coordinate-descent limits.
    pub solver: SolverOptions,
}

impl Default for ElasticNetConfig {
    fn default() -> Self {
        let alphas = [0.001, 0.01, 0.1, 1.0];
        let l1_ratios = [0.1, 0.5, 0.7, 0.9, 0.95, 1.0];
        Self {
            grid: alphas
                .iter()
                .flat_map(|&a| l1_ratios.iter().map(move |&l| Penalty::new(a, l)))
                .collect(),
            solver: SolverOptions::default(),
        }
    }
}

/// Kinetics stage: constants plus the concentration column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KineticsConfig {
    /// Model constants.
    pub parameters: KineticsParameters,
    /// Feature column holding the observed concentration.
    pub concentration_column: String,
    /// Name of the derived elapsed-time feature.
    #[serde(default = "default_estimate_feature")]
    pub feature_name: String,
}

fn default_estimate_feature() -> String {
    "pmi_estimate".to_string()
}

/// Clock stage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Add the drift residual as a model feature.
    pub enabled: bool,
    /// Seed of the subset/weight draw.
    pub seed: u64,
    /// Candidate columns; `None` means the model feature columns.
    pub candidate_columns: Option<Vec<String>>,
    /// Subset cap, center and spread.
    #[serde(flatten)]
    pub scorer: DriftScorer,
    /// Name of the derived drift feature.
    pub feature_name: String,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seed: 42,
            candidate_columns: None,
            scorer: DriftScorer::default(),
            feature_name: "drift".to_string(),
        }
    }
}

/// Feature preparation settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrepConfig {
    /// Drop feature columns missing in more than this fraction of samples.
    pub max_missing_fraction: f64,
    /// Clip z-scores to `[-clip, clip]`.
    pub zscore_clip: Option<f64>,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            max_missing_fraction: 0.2,
            zscore_clip: None,
        }
    }
}

/// Full configuration of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Identifier written to every metrics row.
    pub run_id: String,
    /// Root seed for fold assignment, inner splits and the bootstrap.
    pub seed: u64,
    /// Regression on reference time or classification of the outcome.
    pub task: Task,
    /// Input column names.
    pub columns: ColumnConfig,
    /// Fold counts.
    pub cv: CvConfig,
    /// Elastic-net grid.
    pub elastic_net: ElasticNetConfig,
    /// Kinetics stage; disabled when absent.
    pub kinetics: Option<KineticsConfig>,
    /// Clock stage.
    pub clock: ClockConfig,
    /// Fit isotonic calibration on training predictions.
    pub calibrate: bool,
    /// Fold aggregation.
    pub aggregation: AggregationConfig,
    /// Feature preparation.
    pub prep: PrepConfig,
    /// Metrics to report; empty means the task's full set.
    pub metrics: Vec<Metric>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            run_id: "run".to_string(),
            seed: 42,
            task: Task::default(),
            columns: ColumnConfig::default(),
            cv: CvConfig::default(),
            elastic_net: ElasticNetConfig::default(),
            kinetics: None,
            clock: ClockConfig::default(),
            calibrate: true,
            aggregation: AggregationConfig::default(),
            prep: PrepConfig::default(),
            metrics: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate JSON.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for malformed JSON or rejected values, and
    /// `InvalidModelParameters` for bad kinetics constants.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::config("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    ///
    /// # Errors
    ///
    /// As [`from_json_str`](Self::from_json_str), plus IO errors.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }

    /// Metrics reported by this run.
    #[must_use]
    pub fn resolved_metrics(&self) -> Vec<Metric> {
        if !self.metrics.is_empty() {
            return self.metrics.clone();
        }
        match self.task {
            Task::Classification => Metric::ALL.to_vec(),
            Task::Regression => Metric::ALL
                .into_iter()
                .filter(|m| !m.requires_binary_outcome())
                .collect(),
        }
    }

    /// Check every value the core depends on.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` naming the offending key, or
    /// `InvalidModelParameters` for kinetics constants.
    pub fn validate(&self) -> Result<()> {
        if self.cv.outer_folds < 2 {
            return Err(Error::config("cv.outer_folds", "must be >= 2"));
        }
        if self.cv.inner_folds < 2 {
            return Err(Error::config("cv.inner_folds", "must be >= 2"));
        }
        if self.elastic_net.grid.is_empty() {
            return Err(Error::config("elastic_net.grid", "must not be empty"));
        }
        for (i, p) in self.elastic_net.grid.iter().enumerate() {
            if !(p.alpha.is_finite() && p.alpha >= 0.0) {
                return Err(Error::config(
                    format!("elastic_net.grid[{i}].alpha"),
                    format!("must be >= 0, got {}", p.alpha),
                ));
            }
            if !(0.0..=1.0).contains(&p.l1_ratio) {
                return Err(Error::config(
                    format!("elastic_net.grid[{i}].l1_ratio"),
                    format!("must be in [0, 1], got {}", p.l1_ratio),
                ));
            }
        }
        let solver = &self.elastic_net.solver;
        if solver.max_iter == 0 || solver.max_irls_iter == 0 {
            return Err(Error::config("elastic_net.solver", "iteration limits must be > 0"));
        }
        if !(solver.tol.is_finite() && solver.tol > 0.0) {
            return Err(Error::config("elastic_net.solver.tol", "must be > 0"));
        }
        if self.aggregation.bootstrap_iterations == 0 {
            return Err(Error::config("aggregation.bootstrap_iterations", "must be > 0"));
        }
        if !(self.aggregation.confidence > 0.0 && self.aggregation.confidence < 1.0) {
            return Err(Error::config("aggregation.confidence", "must be in (0, 1)"));
        }
        if !(0.0..=1.0).contains(&self.prep.max_missing_fraction) {
            return Err(Error::config("prep.max_missing_fraction", "must be in [0, 1]"));
        }
        if let Some(clip) = self.prep.zscore_clip {
            if !(clip.is_finite() && clip > 0.0) {
                return Err(Error::config("prep.zscore_clip", "must be > 0"));
            }
        }
        if self.clock.enabled {
            if self.clock.scorer.max_features == 0 {
                return Err(Error::config("clock.max_features", "must be > 0"));
            }
            if self.task == Task::Regression {
                return Err(Error::config(
                    "clock.enabled",
                    "drift is computed from the reference time, which is the regression target",
                ));
            }
        }
        if let Some(kinetics) = &self.kinetics {
            kinetics.parameters.validate()?;
        }
        if self.task == Task::Regression {
            if let Some(m) = self.metrics.iter().find(|m| m.requires_binary_outcome()) {
                return Err(Error::config(
                    "metrics",
                    format!("{m} requires a classification task"),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.elastic_net.grid.len(), 24);
        assert_eq!(config.resolved_metrics().len(), 9);
    }

    #[test]
    fn test_regression_metric_set() {
        let config = PipelineConfig {
            task: Task::Regression,
            clock: ClockConfig {
                enabled: false,
                ..ClockConfig::default()
            },
            ..PipelineConfig::default()
        };
        config.validate().unwrap();
        let metrics = config.resolved_metrics();
        assert!(metrics.contains(&Metric::Mae));
        assert!(!metrics.contains(&Metric::Auc));
    }

    #[test]
    fn test_regression_with_drift_rejected() {
        let config = PipelineConfig {
            task: Task::Regression,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { ref parameter, .. }) if parameter == "clock.enabled"
        ));
    }

    #[test]
    fn test_fold_counts_rejected() {
        let err = PipelineConfig::from_json_str(r#"{"cv": {"outer_folds": 1}}"#).unwrap_err();
        assert!(err.to_string().contains("cv.outer_folds"));
    }

    #[test]
    fn test_kinetics_from_json() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "kinetics": {
                    "parameters": {
                        "c0": 100.0, "k": 0.05,
                        "reference_temperature": 20.0, "activation_energy": 50000.0
                    },
                    "concentration_column": "atp"
                },
                "clock": { "max_features": 10, "seed": 3 }
            }"#,
        )
        .unwrap();
        let kinetics = config.kinetics.unwrap();
        assert_eq!(kinetics.concentration_column, "atp");
        assert_eq!(kinetics.feature_name, "pmi_estimate");
        assert_eq!(config.clock.scorer.max_features, 10);
        assert_eq!(config.clock.seed, 3);
    }

    #[test]
    fn test_bad_kinetics_is_model_error() {
        let err = PipelineConfig::from_json_str(
            r#"{"kinetics": {"parameters": {"c0": 100.0, "k": 0.0,
                "reference_temperature": 20.0, "activation_energy": 0.0},
                "concentration_column": "atp"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidModelParameters { .. }));
    }
}
