//! Metrics Table - the canonical long-form output of a run
//!
//! Column layout is a compatibility contract with downstream reporting:
//!
//! ```text
//! run_id | fold | metric | value | subgroup? | n? | ci_low? | ci_high? | notes?
//! ```

use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, RecordBatch, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

use super::{FoldId, Metric, MetricRecord};
use crate::Result;

/// Ordered, append-only collection of metric records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsTable {
    records: Vec<MetricRecord>,
}

impl MetricsTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from records, sorting into canonical order.
    #[must_use]
    pub fn from_records(mut records: Vec<MetricRecord>) -> Self {
        records.sort_by(MetricRecord::canonical_cmp);
        Self { records }
    }

    /// Append a record, keeping canonical order.
    pub fn push(&mut self, record: MetricRecord) {
        let at = self
            .records
            .partition_point(|r| r.canonical_cmp(&record).is_le());
        self.records.insert(at, record);
    }

    /// All records in canonical order.
    #[must_use]
    pub fn records(&self) -> &[MetricRecord] {
        &self.records
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows for one metric (all folds, all subgroups).
    pub fn metric(&self, metric: Metric) -> impl Iterator<Item = &MetricRecord> + '_ {
        self.records.iter().filter(move |r| r.metric() == metric)
    }

    /// The overall, non-subgroup row for a metric.
    #[must_use]
    pub fn overall(&self, metric: Metric) -> Option<&MetricRecord> {
        self.records
            .iter()
            .find(|r| r.metric() == metric && r.fold() == FoldId::Overall && r.subgroup().is_none())
    }

    /// Arrow schema of the canonical table.
    #[must_use]
    pub fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("run_id", DataType::Utf8, false),
            Field::new("fold", DataType::Utf8, false),
            Field::new("metric", DataType::Utf8, false),
            Field::new("value", DataType::Float64, false),
            Field::new("subgroup", DataType::Utf8, true),
            Field::new("n", DataType::UInt64, true),
            Field::new("ci_low", DataType::Float64, true),
            Field::new("ci_high", DataType::Float64, true),
            Field::new("notes", DataType::Utf8, true),
        ]))
    }

    /// Materialize as a single Arrow record batch.
    ///
    /// # Errors
    ///
    /// Returns an Arrow error if the batch cannot be assembled.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let rows = &self.records;
        let columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(rows.iter().map(MetricRecord::run_id))),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.fold().to_string()),
            )),
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|r| r.metric().as_str()),
            )),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(MetricRecord::value))),
            Arc::new(StringArray::from(
                rows.iter().map(MetricRecord::subgroup).collect::<Vec<_>>(),
            )),
            Arc::new(UInt64Array::from(
                rows.iter()
                    .map(|r| r.n().map(|n| n as u64))
                    .collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                rows.iter().map(MetricRecord::ci_low).collect::<Vec<_>>(),
            )),
            Arc::new(Float64Array::from(
                rows.iter().map(MetricRecord::ci_high).collect::<Vec<_>>(),
            )),
            Arc::new(StringArray::from(
                rows.iter().map(MetricRecord::notes).collect::<Vec<_>>(),
            )),
        ];
        Ok(RecordBatch::try_new(Self::schema(), columns)?)
    }
}
