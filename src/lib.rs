//! # Epiclock: decay kinetics, drift clocks and nested cross-validation
//!
//! **Version**: 0.1.0
//!
//! Epiclock estimates elapsed time from a decaying measurement, derives an
//! epigenetic drift feature from a seeded linear clock, trains elastic-net
//! models under nested cross-validation with isotonic calibration, and
//! reports every metric in one canonical long-form table with bootstrap
//! confidence intervals.
//!
//! ## Stages
//!
//! - [`kinetics`]: first-order decay with Arrhenius temperature correction
//! - [`clock`]: random linear clock, normalized score and drift residual
//! - [`evaluate`]: stratified outer/inner folds, grid search, calibration
//! - [`experiment`]: metric records, aggregation and the canonical table
//! - [`pipeline`]: wires the stages for one run
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use epiclock::config::PipelineConfig;
//! use epiclock::pipeline::Pipeline;
//! use epiclock::storage::StorageEngine;
//!
//! epiclock::telemetry::init("info");
//!
//! let config = PipelineConfig::from_path("run.json")?;
//! let storage = StorageEngine::load_parquet("data/samples.parquet")?;
//! let report = Pipeline::new(config)?.run_storage(&storage)?;
//!
//! for row in report.table.records() {
//!     println!("{} {} {}", row.fold(), row.metric(), row.value());
//! }
//! report.write_parquet("out/metrics.parquet")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod evaluate;
pub mod experiment;
pub mod kinetics;
pub mod model;
pub mod pipeline;
pub mod storage;
pub mod telemetry;

pub use error::{Error, Result};
