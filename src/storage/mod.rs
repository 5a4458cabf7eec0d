//! Storage backend (Arrow/Parquet)
//!
//! Append-only batches in, [`Sample`]s out:
//! - Ingestion: Parquet file or in-memory `RecordBatch`es
//! - Column validation against a [`ColumnConfig`]
//! - Export: any batch set (the canonical metrics table included) back to Parquet
//!
//! Numeric columns of any Arrow numeric type are cast to Float64; nulls
//! become NaN so the prep stage treats them as missing.

use std::fs::File;
use std::path::Path;

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use tracing::{debug, info};

use crate::config::ColumnConfig;
use crate::data::{Sample, SampleBuilder};
use crate::{Error, Result};

/// Temperature assumed when no temperature column is configured (°C).
pub const DEFAULT_TEMPERATURE: f64 = 20.0;

/// Storage engine for Arrow/Parquet data
#[derive(Debug, Clone, Default)]
pub struct StorageEngine {
    batches: Vec<RecordBatch>,
}

impl StorageEngine {
    /// Create a new storage engine from existing batches
    #[must_use]
    pub const fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }

    /// Load table from Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;

        let reader = builder
            .build()
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

        let mut batches = Vec::new();
        for batch in reader {
            let batch = batch
                .map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))?;
            batches.push(batch);
        }
        debug!(path = %path.as_ref().display(), batches = batches.len(), "parquet loaded");

        Ok(Self { batches })
    }

    /// Write every batch to one Parquet file
    ///
    /// # Errors
    /// Returns `StorageError` if there is nothing to write or the file
    /// cannot be created or encoded
    pub fn save_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let Some(first) = self.batches.first() else {
            return Err(Error::StorageError("No batches to write".to_string()));
        };
        let file = File::create(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet file: {e}")))?;
        let mut writer = ArrowWriter::try_new(file, first.schema(), None)
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet writer: {e}")))?;
        for batch in &self.batches {
            writer
                .write(batch)
                .map_err(|e| Error::StorageError(format!("Failed to write record batch: {e}")))?;
        }
        writer
            .close()
            .map_err(|e| Error::StorageError(format!("Failed to finalize Parquet file: {e}")))?;
        info!(path = %path.as_ref().display(), rows = self.num_rows(), "parquet written");
        Ok(())
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total rows across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Append batches to storage
    ///
    /// # Example
    ///
    /// ```rust
    /// # use epiclock::storage::StorageEngine;
    /// # use arrow::array::{Float64Array, RecordBatch};
    /// # use arrow::datatypes::{DataType, Field, Schema};
    /// # use std::sync::Arc;
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let schema = Arc::new(Schema::new(vec![
    ///     Field::new("age", DataType::Float64, false),
    /// ]));
    /// let batch = RecordBatch::try_new(
    ///     schema,
    ///     vec![Arc::new(Float64Array::from(vec![31.0, 45.5, 62.0]))],
    /// )?;
    ///
    /// let mut storage = StorageEngine::new(vec![]);
    /// storage.append_batch(batch)?;
    /// assert_eq!(storage.num_rows(), 3);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Returns error if batch schema doesn't match existing batches
    pub fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if let Some(existing) = self.batches.first() {
            let existing_schema = existing.schema();
            if batch.schema() != existing_schema {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected {:?}, got {:?}",
                    existing_schema,
                    batch.schema()
                )));
            }
        }

        self.batches.push(batch);
        Ok(())
    }

    /// Whether the stored schema has a column called `name`
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.batches
            .first()
            .is_some_and(|b| b.schema().column_with_name(name).is_some())
    }

    /// Decode every row into a [`Sample`]
    ///
    /// Feature columns are the configured list, or every numeric column
    /// not claimed by id, target, temperature, outcome or subgroups.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` naming the column when a configured column is
    /// absent, has an unusable type, or an id is null.
    pub fn to_samples(&self, columns: &ColumnConfig) -> Result<Vec<Sample>> {
        let mut samples = Vec::with_capacity(self.num_rows());
        for batch in &self.batches {
            samples.extend(decode_batch(batch, columns)?);
        }
        debug!(samples = samples.len(), "samples decoded");
        Ok(samples)
    }
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::schema(name, "column not found"))
}

fn numeric(batch: &RecordBatch, name: &str) -> Result<Vec<f64>> {
    let array = column(batch, name)?;
    let data_type = array.data_type();
    if !(data_type.is_numeric() || *data_type == DataType::Boolean) {
        return Err(Error::schema(name, format!("expected a numeric column, got {data_type}")));
    }
    let as_f64 = cast(array, &DataType::Float64)
        .map_err(|e| Error::schema(name, format!("not numeric: {e}")))?;
    let values = as_f64
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::schema(name, "not numeric"))?;
    Ok(values.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

fn text(batch: &RecordBatch, name: &str) -> Result<Vec<Option<String>>> {
    let array = column(batch, name)?;
    let as_utf8 = cast(array, &DataType::Utf8)
        .map_err(|e| Error::schema(name, format!("not castable to text: {e}")))?;
    let values = as_utf8
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::schema(name, "not castable to text"))?;
    Ok(values.iter().map(|v| v.map(str::to_string)).collect())
}

fn feature_columns(batch: &RecordBatch, columns: &ColumnConfig) -> Vec<String> {
    if let Some(features) = &columns.features {
        return features.clone();
    }
    let reserved = |name: &str| {
        name == columns.id
            || name == columns.target
            || columns.temperature.as_deref() == Some(name)
            || columns.outcome.as_deref() == Some(name)
            || columns.subgroups.iter().any(|s| s == name)
    };
    batch
        .schema()
        .fields()
        .iter()
        .filter(|f| f.data_type().is_numeric() && !reserved(f.name()))
        .map(|f| f.name().clone())
        .collect()
}

fn decode_batch(batch: &RecordBatch, columns: &ColumnConfig) -> Result<Vec<Sample>> {
    let ids = text(batch, &columns.id)?;
    let targets = numeric(batch, &columns.target)?;
    let temperatures = columns
        .temperature
        .as_deref()
        .map(|name| numeric(batch, name))
        .transpose()?;
    let outcomes = columns
        .outcome
        .as_deref()
        .map(|name| numeric(batch, name))
        .transpose()?;
    let subgroups = columns
        .subgroups
        .iter()
        .map(|name| text(batch, name).map(|values| (name, values)))
        .collect::<Result<Vec<_>>>()?;
    let features = feature_columns(batch, columns)
        .into_iter()
        .map(|name| numeric(batch, &name).map(|values| (name, values)))
        .collect::<Result<Vec<_>>>()?;

    let mut samples = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let id = ids[row]
            .clone()
            .ok_or_else(|| Error::schema(&columns.id, format!("null id at row {row}")))?;
        let mut builder = SampleBuilder::new(id, targets[row]).temperature(
            temperatures
                .as_ref()
                .map_or(DEFAULT_TEMPERATURE, |t| t[row]),
        );
        if let Some(outcome) = outcomes.as_ref().map(|o| o[row]).filter(|v| !v.is_nan()) {
            builder = builder.outcome(outcome != 0.0);
        }
        for (name, values) in &subgroups {
            if let Some(value) = &values[row] {
                builder = builder.subgroup(name.as_str(), value.as_str());
            }
        }
        for (name, values) in &features {
            builder = builder.feature(name.as_str(), values[row]);
        }
        samples.push(builder.build());
    }
    Ok(samples)
}
