//! Feature preparation: sparse-column filtering and z-scoring

use tracing::debug;

use super::{FeatureMatrix, Sample};

/// Keep the candidate columns whose missing fraction is at most
/// `max_missing_fraction`. A value is missing when it is absent from the
/// sample or not finite. Order of `candidates` is preserved.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn retain_dense_features(
    samples: &[Sample],
    candidates: &[String],
    max_missing_fraction: f64,
) -> Vec<String> {
    if samples.is_empty() {
        return candidates.to_vec();
    }
    let n = samples.len() as f64;
    candidates
        .iter()
        .filter(|column| {
            let missing = samples
                .iter()
                .filter(|s| !s.feature(column).is_some_and(f64::is_finite))
                .count();
            let fraction = missing as f64 / n;
            if fraction > max_missing_fraction {
                debug!(column = column.as_str(), fraction, "dropping sparse feature");
                false
            } else {
                true
            }
        })
        .cloned()
        .collect()
}

/// Per-column z-score fitted on a training partition.
///
/// Mean and population standard deviation ignore non-finite values.
/// Transformed missing values become 0 (the training mean). Zero-variance
/// columns map to 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Standardizer {
    means: Vec<f64>,
    stds: Vec<f64>,
    clip: Option<f64>,
}

impl Standardizer {
    /// Fit column statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(x: &FeatureMatrix, clip: Option<f64>) -> Self {
        let mut means = Vec::with_capacity(x.n_cols());
        let mut stds = Vec::with_capacity(x.n_cols());
        for j in 0..x.n_cols() {
            let values: Vec<f64> = x.column(j).into_iter().filter(|v| v.is_finite()).collect();
            if values.is_empty() {
                means.push(0.0);
                stds.push(0.0);
                continue;
            }
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            means.push(mean);
            stds.push(var.sqrt());
        }
        Self { means, stds, clip }
    }

    /// Apply to a matrix with the same column layout.
    #[must_use]
    pub fn transform(&self, x: &FeatureMatrix) -> Vec<Vec<f64>> {
        (0..x.n_rows())
            .map(|i| {
                x.row(i)
                    .iter()
                    .enumerate()
                    .map(|(j, &v)| self.scale(j, v))
                    .collect()
            })
            .collect()
    }

    fn scale(&self, j: usize, v: f64) -> f64 {
        if !v.is_finite() || self.stds[j] <= f64::EPSILON {
            return 0.0;
        }
        let z = (v - self.means[j]) / self.stds[j];
        match self.clip {
            Some(c) => z.clamp(-c, c),
            None => z,
        }
    }

    /// Fitted column means.
    #[must_use]
    pub fn means(&self) -> &[f64] {
        &self.means
    }

    /// Copy of `x` with non-finite values replaced by the fitted column
    /// means, on the original scale.
    #[must_use]
    pub fn impute(&self, x: &FeatureMatrix) -> FeatureMatrix {
        let width = x.n_cols();
        let data = x
            .data
            .iter()
            .enumerate()
            .map(|(i, &v)| if v.is_finite() { v } else { self.means[i % width] })
            .collect();
        FeatureMatrix {
            columns: x.columns.clone(),
            n_rows: x.n_rows,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_dense_features() {
        let samples: Vec<Sample> = (0..10)
            .map(|i| {
                let mut b = Sample::builder(format!("s{i}"), 1.0).feature("dense", 1.0);
                if i < 3 {
                    b = b.feature("sparse", f64::NAN);
                } else {
                    b = b.feature("sparse", 2.0);
                }
                b.build()
            })
            .collect();
        let cols = vec!["dense".to_string(), "sparse".to_string(), "absent".to_string()];
        assert_eq!(retain_dense_features(&samples, &cols, 0.2), vec!["dense".to_string()]);
        assert_eq!(retain_dense_features(&samples, &cols, 0.3).len(), 2);
    }

    #[test]
    fn test_standardizer_imputes_and_clips() {
        let x = FeatureMatrix::from_rows(
            vec!["a".into(), "b".into()],
            &[vec![1.0, 5.0], vec![3.0, 5.0], vec![f64::NAN, 5.0], vec![100.0, 5.0]],
        )
        .unwrap();
        let scaler = Standardizer::fit(&x, Some(1.0));
        let z = scaler.transform(&x);
        assert!(z[2][0].abs() < f64::EPSILON);
        assert!(z.iter().all(|row| row[1].abs() < f64::EPSILON));
        assert!((z[3][0] - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_impute_uses_training_means() {
        let train = FeatureMatrix::from_rows(
            vec!["a".to_string()],
            &[vec![1.0], vec![3.0], vec![f64::NAN]],
        )
        .unwrap();
        let scaler = Standardizer::fit(&train, None);
        let filled = scaler.impute(&train);
        assert!((filled.get(2, 0) - 2.0).abs() < 1e-12);
        assert!((filled.get(0, 0) - 1.0).abs() < 1e-12);
    }
}
