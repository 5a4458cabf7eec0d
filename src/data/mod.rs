//! Samples and dense feature matrices
//!
//! A [`Sample`] is one observational unit as loaded from the input table.
//! Samples are immutable once built; the pipeline only ever reads them.
//! [`FeatureMatrix`] is the row-major numeric view handed to the clock and
//! the elastic-net model. Missing measurements are carried as `NaN`.

pub mod prep;

use std::collections::BTreeMap;

use crate::{Error, Result};

/// One observational unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    id: String,
    reference_time: f64,
    temperature: f64,
    features: BTreeMap<String, f64>,
    subgroups: BTreeMap<String, String>,
    outcome: Option<bool>,
}

impl Sample {
    /// Create a builder with the required fields.
    #[must_use]
    pub fn builder(id: impl Into<String>, reference_time: f64) -> SampleBuilder {
        SampleBuilder::new(id, reference_time)
    }

    /// Sample identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Known reference time (chronological age, true elapsed interval, ...).
    #[must_use]
    pub const fn reference_time(&self) -> f64 {
        self.reference_time
    }

    /// Ambient temperature in degrees Celsius.
    #[must_use]
    pub const fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Measurement for a feature. `None` when the column is absent,
    /// `Some(NaN)` when present but missing.
    #[must_use]
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied()
    }

    /// All feature measurements, ordered by name.
    #[must_use]
    pub const fn features(&self) -> &BTreeMap<String, f64> {
        &self.features
    }

    /// Categorical subgroup labels (column -> value).
    #[must_use]
    pub const fn subgroups(&self) -> &BTreeMap<String, String> {
        &self.subgroups
    }

    /// Subgroup tags rendered as `column=value`, ordered by column.
    #[must_use]
    pub fn subgroup_tags(&self) -> Vec<String> {
        self.subgroups
            .iter()
            .map(|(column, value)| format!("{column}={value}"))
            .collect()
    }

    /// Binary outcome for classification runs.
    #[must_use]
    pub const fn outcome(&self) -> Option<bool> {
        self.outcome
    }
}

/// Builder for `Sample`.
#[derive(Debug)]
pub struct SampleBuilder {
    id: String,
    reference_time: f64,
    temperature: f64,
    features: BTreeMap<String, f64>,
    subgroups: BTreeMap<String, String>,
    outcome: Option<bool>,
}

impl SampleBuilder {
    /// Create a new builder with required fields. Temperature defaults to 20 °C.
    #[must_use]
    pub fn new(id: impl Into<String>, reference_time: f64) -> Self {
        Self {
            id: id.into(),
            reference_time,
            temperature: 20.0,
            features: BTreeMap::new(),
            subgroups: BTreeMap::new(),
            outcome: None,
        }
    }

    /// Set the ambient temperature (°C).
    #[must_use]
    pub const fn temperature(mut self, celsius: f64) -> Self {
        self.temperature = celsius;
        self
    }

    /// Add a feature measurement.
    #[must_use]
    pub fn feature(mut self, name: impl Into<String>, value: f64) -> Self {
        self.features.insert(name.into(), value);
        self
    }

    /// Add a subgroup label.
    #[must_use]
    pub fn subgroup(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.subgroups.insert(column.into(), value.into());
        self
    }

    /// Set the binary outcome.
    #[must_use]
    pub const fn outcome(mut self, outcome: bool) -> Self {
        self.outcome = Some(outcome);
        self
    }

    /// Build the `Sample`.
    #[must_use]
    pub fn build(self) -> Sample {
        Sample {
            id: self.id,
            reference_time: self.reference_time,
            temperature: self.temperature,
            features: self.features,
            subgroups: self.subgroups,
            outcome: self.outcome,
        }
    }
}

/// Dense row-major matrix with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    n_rows: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    /// Build from row vectors.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if a row length does not match the column count.
    pub fn from_rows(columns: Vec<String>, rows: &[Vec<f64>]) -> Result<Self> {
        let mut data = Vec::with_capacity(rows.len() * columns.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(Error::schema(
                    format!("row {i}"),
                    format!("expected {} values, got {}", columns.len(), row.len()),
                ));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            columns,
            n_rows: rows.len(),
            data,
        })
    }

    /// Gather the named columns from samples, in the given order. A sample
    /// lacking a column contributes NaN (missing).
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` naming the column if no sample carries it.
    pub fn from_samples(samples: &[Sample], columns: &[String]) -> Result<Self> {
        if let Some(absent) = columns
            .iter()
            .find(|c| !samples.is_empty() && samples.iter().all(|s| s.feature(c).is_none()))
        {
            return Err(Error::schema(absent, "not present in any sample"));
        }
        let mut data = Vec::with_capacity(samples.len() * columns.len());
        for sample in samples {
            for column in columns {
                data.push(sample.feature(column).unwrap_or(f64::NAN));
            }
        }
        Ok(Self {
            columns: columns.to_vec(),
            n_rows: samples.len(),
            data,
        })
    }

    /// Column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    #[must_use]
    pub const fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    #[must_use]
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Position of a named column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Row `i` as a slice.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        let width = self.n_cols();
        &self.data[i * width..(i + 1) * width]
    }

    /// Single cell.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols() + col]
    }

    /// Copy of column `j`.
    #[must_use]
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.n_rows).map(|i| self.get(i, j)).collect()
    }

    /// New matrix with the given rows, in the given order.
    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let mut data = Vec::with_capacity(rows.len() * self.n_cols());
        for &i in rows {
            data.extend_from_slice(self.row(i));
        }
        Self {
            columns: self.columns.clone(),
            n_rows: rows.len(),
            data,
        }
    }

    /// New matrix with the given columns, in the given order.
    #[must_use]
    pub fn select_columns(&self, cols: &[usize]) -> Self {
        let mut data = Vec::with_capacity(self.n_rows * cols.len());
        for i in 0..self.n_rows {
            let row = self.row(i);
            data.extend(cols.iter().map(|&j| row[j]));
        }
        Self {
            columns: cols.iter().map(|&j| self.columns[j].clone()).collect(),
            n_rows: self.n_rows,
            data,
        }
    }

    /// Append a column on the right.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if the column is already present or its length
    /// does not match the row count.
    pub fn with_column(&self, name: impl Into<String>, values: &[f64]) -> Result<Self> {
        let name = name.into();
        if self.column_index(&name).is_some() {
            return Err(Error::schema(name, "column already present"));
        }
        if values.len() != self.n_rows {
            return Err(Error::schema(
                name,
                format!("expected {} values, got {}", self.n_rows, values.len()),
            ));
        }
        let width = self.n_cols();
        let mut data = Vec::with_capacity(self.n_rows * (width + 1));
        for (i, value) in values.iter().enumerate() {
            data.extend_from_slice(&self.data[i * width..(i + 1) * width]);
            data.push(*value);
        }
        let mut columns = self.columns.clone();
        columns.push(name);
        Ok(Self {
            columns,
            n_rows: self.n_rows,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_sample_builder() {
        let sample = Sample::builder("s1", 42.0)
            .temperature(4.0)
            .feature("cg01", 0.5)
            .subgroup("sex", "F")
            .outcome(true)
            .build();
        assert_eq!(sample.id(), "s1");
        assert!((sample.reference_time() - 42.0).abs() < f64::EPSILON);
        assert_eq!(sample.feature("cg01"), Some(0.5));
        assert_eq!(sample.feature("cg02"), None);
        assert_eq!(sample.subgroup_tags(), vec!["sex=F".to_string()]);
        assert_eq!(sample.outcome(), Some(true));
    }

    #[test]
    fn test_from_samples_missing_column() {
        let samples = vec![Sample::builder("s1", 1.0).feature("a", 1.0).build()];
        let err = FeatureMatrix::from_samples(&samples, &names(&["a", "b"])).unwrap_err();
        assert!(err.to_string().contains("`b`"));
    }

    #[test]
    fn test_from_samples_absent_value_is_nan() {
        let samples = vec![
            Sample::builder("s1", 1.0).feature("a", 1.0).feature("b", 2.0).build(),
            Sample::builder("s2", 2.0).feature("a", 3.0).build(),
        ];
        let x = FeatureMatrix::from_samples(&samples, &names(&["a", "b"])).unwrap();
        assert!((x.get(0, 1) - 2.0).abs() < f64::EPSILON);
        assert!(x.get(1, 1).is_nan());
    }

    #[test]
    fn test_select_and_append() {
        let m = FeatureMatrix::from_rows(
            names(&["a", "b"]),
            &[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]],
        )
        .unwrap();
        let rows = m.select_rows(&[2, 0]);
        assert_eq!(rows.row(0), &[5.0, 6.0]);
        let cols = m.select_columns(&[1]);
        assert_eq!(cols.column(0), vec![2.0, 4.0, 6.0]);
        let wide = m.with_column("c", &[7.0, 8.0, 9.0]).unwrap();
        assert_eq!(wide.row(1), &[3.0, 4.0, 8.0]);
        assert!(m.with_column("a", &[0.0, 0.0, 0.0]).is_err());
        assert!(m.with_column("d", &[0.0]).is_err());
    }
}
