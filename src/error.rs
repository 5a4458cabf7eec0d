//! Error types for epiclock
//!
//! Fatal conditions (schema, configuration, model parameters) abort a run.
//! Sample-level and fold-level conditions are recorded and the run continues.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// epiclock error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kinetics constants are malformed (fatal)
    #[error("Invalid model parameter `{parameter}`: {reason}")]
    InvalidModelParameters {
        /// Offending parameter name
        parameter: String,
        /// What is wrong with it
        reason: String,
    },

    /// Observed concentration outside `(0, C0]` (per-sample)
    #[error("Measurement out of range for sample {sample_id}: observed {observed} not in (0, {c0}]")]
    OutOfRangeMeasurement {
        /// Sample identifier (empty when called outside a table)
        sample_id: String,
        /// Observed concentration
        observed: f64,
        /// Initial concentration of the model
        c0: f64,
    },

    /// Double-exponential root-find did not converge (per-sample)
    #[error("Root-find did not converge for sample {sample_id} after {iterations} iterations")]
    ConvergenceFailure {
        /// Sample identifier (empty when called outside a table)
        sample_id: String,
        /// Iterations spent before giving up
        iterations: usize,
    },

    /// Sample temperature missing or at/below absolute zero (per-sample)
    #[error("Invalid temperature for sample {sample_id}: {temperature} °C")]
    InvalidTemperature {
        /// Sample identifier (empty when called outside a table)
        sample_id: String,
        /// Temperature as supplied
        temperature: f64,
    },

    /// Clock fit has no candidate feature columns (fatal)
    #[error("Insufficient features: {0}")]
    InsufficientFeatures(String),

    /// Input contract violated (fatal)
    #[error("Schema error in column `{column}`: {reason}")]
    SchemaError {
        /// Offending column name
        column: String,
        /// What is wrong with it
        reason: String,
    },

    /// Metric undefined on a fold (per fold, per metric)
    #[error("Degenerate fold {fold}: {metric} omitted ({reason})")]
    DegenerateFold {
        /// Fold index
        fold: usize,
        /// Metric name
        metric: String,
        /// Why it could not be computed
        reason: String,
    },

    /// Configuration value rejected (fatal)
    #[error("Invalid configuration `{parameter}`: {reason}")]
    InvalidConfig {
        /// Offending configuration key
        parameter: String,
        /// What is wrong with it
        reason: String,
    },

    /// Not enough usable samples for the requested split
    #[error("Insufficient samples: need at least {needed}, got {available}")]
    InsufficientSamples {
        /// Minimum required
        needed: usize,
        /// Usable samples
        available: usize,
    },

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl Error {
    /// Shorthand for [`Error::SchemaError`]
    pub fn schema(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SchemaError {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidConfig`]
    pub fn config(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidModelParameters`]
    pub fn model_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidModelParameters {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Whether the condition only affects one sample and the run may continue.
    #[must_use]
    pub const fn is_sample_level(&self) -> bool {
        matches!(
            self,
            Self::OutOfRangeMeasurement { .. }
                | Self::ConvergenceFailure { .. }
                | Self::InvalidTemperature { .. }
        )
    }

    /// Attach a sample id to a sample-level condition.
    #[must_use]
    pub fn for_sample(self, id: &str) -> Self {
        match self {
            Self::OutOfRangeMeasurement { observed, c0, .. } => Self::OutOfRangeMeasurement {
                sample_id: id.to_string(),
                observed,
                c0,
            },
            Self::ConvergenceFailure { iterations, .. } => Self::ConvergenceFailure {
                sample_id: id.to_string(),
                iterations,
            },
            Self::InvalidTemperature { temperature, .. } => Self::InvalidTemperature {
                sample_id: id.to_string(),
                temperature,
            },
            other => other,
        }
    }
}
