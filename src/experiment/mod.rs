//! Run tracking and the canonical metrics table
//!
//! ## Schema Overview
//!
//! ```text
//! RunRecord (1) ──< MetricRecord (N)   [run_id, fold, metric, subgroup]
//!                        │
//!                        └── MetricsAggregator ──> MetricsTable (canonical order)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use epiclock::experiment::{
//!     AggregationConfig, FoldId, Metric, MetricRecord, MetricsAggregator, RunRecord, RunStatus,
//! };
//!
//! let mut run = RunRecord::new("run-001", 42);
//! run.start();
//!
//! let per_fold: Vec<MetricRecord> = [0.71, 0.74, 0.69]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, v)| MetricRecord::builder("run-001", FoldId::Index(i), Metric::Auc, *v).n(30).build())
//!     .collect();
//!
//! let table = MetricsAggregator::new(AggregationConfig::default(), 42).aggregate(&per_fold);
//! assert_eq!(table.len(), 4);
//!
//! run.succeed();
//! assert_eq!(run.status(), RunStatus::Success);
//! ```

mod aggregate;
mod metric_record;
mod run_record;
mod table;

pub use aggregate::{AggregationConfig, MetricsAggregator};
pub use metric_record::{FoldId, Metric, MetricRecord, MetricRecordBuilder};
pub use run_record::{RunRecord, RunStatus};
pub use table::MetricsTable;
