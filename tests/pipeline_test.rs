//! End-to-end pipeline tests

use std::sync::Arc;

use arrow::array::{Float64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use epiclock::config::{PipelineConfig, Task};
use epiclock::data::Sample;
use epiclock::experiment::{FoldId, Metric, RunStatus};
use epiclock::pipeline::Pipeline;
use epiclock::storage::StorageEngine;
use epiclock::Error;

const CONFIG: &str = r#"{
    "run_id": "pilot",
    "seed": 11,
    "task": "classification",
    "columns": { "subgroups": ["site"] },
    "cv": { "outer_folds": 3, "inner_folds": 2 },
    "elastic_net": {
        "grid": [
            { "alpha": 0.01, "l1_ratio": 0.5 },
            { "alpha": 0.1, "l1_ratio": 1.0 }
        ]
    },
    "kinetics": {
        "parameters": {
            "c0": 100.0, "k": 0.05,
            "reference_temperature": 20.0, "activation_energy": 50000.0
        },
        "concentration_column": "atp"
    },
    "clock": { "max_features": 4, "seed": 5 },
    "aggregation": { "bootstrap_iterations": 200 }
}"#;

#[allow(clippy::cast_precision_loss)]
fn cohort() -> Vec<Sample> {
    (0..45)
        .map(|i| {
            let age = 25.0 + i as f64;
            let case = i % 3 == 0;
            let atp = if i == 10 { 140.0 } else { 100.0 * (-0.05 * (i % 9) as f64).exp() };
            let mut builder = Sample::builder(format!("P{i:03}"), age)
                .temperature(if i % 2 == 0 { 4.0 } else { 20.0 })
                .feature("atp", atp)
                .feature("cg01", (if case { 0.8 } else { 0.2 }) + ((i * 7) % 5) as f64 * 0.02)
                .feature("cg02", age / 100.0)
                .feature("cg03", ((i * 11) % 13) as f64 / 13.0)
                .feature("cg04", ((i * 3) % 7) as f64 / 7.0)
                .subgroup("site", if i % 5 < 3 { "north" } else { "south" })
                .outcome(case);
            if i % 4 != 0 {
                builder = builder.feature("cg05", 0.5);
            }
            builder.build()
        })
        .collect()
}

#[test]
fn test_end_to_end_classification_run() {
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let report = Pipeline::new(config).unwrap().run(&cohort()).unwrap();

    assert_eq!(report.run.status(), RunStatus::Success);
    assert_eq!(report.run.n_samples(), 44);
    assert_eq!(report.run.n_excluded(), 1);
    assert_eq!(report.excluded[0].sample_id, "P010");
    assert_eq!(report.predictions.len(), 44);

    // cg05 is missing for a quarter of the cohort and is dropped.
    assert!(!report.features.iter().any(|f| f == "cg05"));
    assert!(!report.features.iter().any(|f| f == "atp"));
    assert!(report.features.iter().any(|f| f == "pmi_estimate"));

    let mae = report.table.overall(Metric::Mae).unwrap();
    assert_eq!(mae.fold(), FoldId::Overall);
    assert_eq!(mae.n(), Some(44));
    assert!(mae.notes().unwrap().contains("excluded 1 samples"));
    assert!(mae.ci_low().unwrap() <= mae.value() && mae.value() <= mae.ci_high().unwrap());

    let per_fold = report
        .table
        .metric(Metric::Mae)
        .filter(|r| r.subgroup().is_none() && r.fold() != FoldId::Overall)
        .count();
    assert_eq!(per_fold, 3);
}

#[test]
fn test_subgroup_rows_respect_minimum_size() {
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let report = Pipeline::new(config).unwrap().run(&cohort()).unwrap();

    for row in report.table.records() {
        if row.subgroup().is_some() {
            assert!(row.n().unwrap() >= 10, "{row:?}");
        }
    }
    assert!(report
        .table
        .records()
        .iter()
        .any(|r| r.subgroup() == Some("site=north") && r.fold() == FoldId::Overall));
}

#[test]
fn test_same_seed_same_table() {
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let pipeline = Pipeline::new(config).unwrap();
    let a = pipeline.run(&cohort()).unwrap();
    let b = pipeline.run(&cohort()).unwrap();
    assert_eq!(a.table, b.table);
    assert_eq!(a.predictions, b.predictions);
}

#[test]
fn test_report_written_as_parquet() {
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let report = Pipeline::new(config).unwrap().run(&cohort()).unwrap();

    let path = std::env::temp_dir()
        .join(format!("epiclock_{}_report.parquet", std::process::id()));
    report.write_parquet(&path).unwrap();
    let loaded = StorageEngine::load_parquet(&path).unwrap();
    assert_eq!(loaded.num_rows(), report.table.len());
    std::fs::remove_file(&path).ok();
}

#[test]
fn test_missing_concentration_column_is_fatal() {
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let samples: Vec<Sample> = cohort()
        .into_iter()
        .map(|s| {
            let mut b = Sample::builder(s.id(), s.reference_time())
                .outcome(s.outcome().unwrap_or(false));
            for (name, value) in s.features().iter().filter(|(n, _)| n.as_str() != "atp") {
                b = b.feature(name.as_str(), *value);
            }
            b.build()
        })
        .collect();
    let err = Pipeline::new(config).unwrap().run(&samples).unwrap_err();
    assert!(matches!(err, Error::SchemaError { ref column, .. } if column == "atp"));
}

#[test]
fn test_invalid_config_rejected_up_front() {
    let mut config = PipelineConfig::from_json_str(CONFIG).unwrap();
    config.aggregation.bootstrap_iterations = 0;
    let err = Pipeline::new(config).unwrap_err();
    assert!(err.to_string().contains("bootstrap_iterations"));
}

#[test]
fn test_missing_temperature_excludes_only_that_sample() {
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let samples: Vec<Sample> = cohort()
        .into_iter()
        .map(|s| {
            if s.id() != "P020" {
                return s;
            }
            let mut b = Sample::builder(s.id(), s.reference_time())
                .temperature(f64::NAN)
                .outcome(s.outcome().unwrap_or(false));
            for (name, value) in s.features() {
                b = b.feature(name.as_str(), *value);
            }
            for (column, value) in s.subgroups() {
                b = b.subgroup(column.as_str(), value.as_str());
            }
            b.build()
        })
        .collect();

    let report = Pipeline::new(config).unwrap().run(&samples).unwrap();
    assert_eq!(report.run.status(), RunStatus::Success);
    let ids: Vec<&str> = report.excluded.iter().map(|e| e.sample_id.as_str()).collect();
    assert_eq!(ids, ["P010", "P020"]);
    assert!(report.excluded[1].reason.contains("P020"));
    assert_eq!(report.run.n_samples(), 43);
    assert!(!report.predictions.iter().any(|p| p.sample_id == "P020"));
    let mae = report.table.overall(Metric::Mae).unwrap();
    assert!(mae.notes().unwrap().contains("excluded 2 samples"));
}

#[test]
fn test_failed_run_record_is_returned() {
    let config = PipelineConfig::from_json_str(CONFIG).unwrap();
    let mut samples = cohort();
    samples.truncate(2);
    let (run, result) = Pipeline::new(config).unwrap().run_with_record(&samples);
    let err = result.unwrap_err();
    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.failure(), Some(err.to_string().as_str()));
}

#[allow(clippy::cast_precision_loss)]
fn regression_table(rows: usize) -> StorageEngine {
    let schema = Schema::new(vec![
        Field::new("sample_id", DataType::Utf8, false),
        Field::new("age", DataType::Float64, false),
        Field::new("temperature", DataType::Float64, false),
        Field::new("cg01", DataType::Float64, false),
        Field::new("cg02", DataType::Float64, false),
        Field::new("cg03", DataType::Float64, false),
    ]);
    let age: Vec<f64> = (0..rows).map(|i| 20.0 + 1.5 * i as f64).collect();
    let batch = RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(StringArray::from_iter_values((0..rows).map(|i| format!("R{i:03}")))),
            Arc::new(Float64Array::from(age.clone())),
            Arc::new(Float64Array::from_iter_values((0..rows).map(|_| 20.0))),
            Arc::new(Float64Array::from_iter_values(age.iter().map(|a| a / 100.0))),
            Arc::new(Float64Array::from_iter_values((0..rows).map(|i| ((i * 7) % 11) as f64 / 11.0))),
            Arc::new(Float64Array::from_iter_values((0..rows).map(|i| ((i * 3) % 5) as f64 / 5.0))),
        ],
    )
    .unwrap();
    StorageEngine::new(vec![batch])
}

fn regression_config() -> PipelineConfig {
    PipelineConfig::from_json_str(
        r#"{
            "task": "regression",
            "cv": { "outer_folds": 3, "inner_folds": 2 },
            "elastic_net": { "grid": [{ "alpha": 0.01, "l1_ratio": 0.5 }] },
            "clock": { "enabled": false },
            "aggregation": { "bootstrap_iterations": 100 }
        }"#,
    )
    .unwrap()
}

#[test]
fn test_regression_table_without_outcome_column() {
    let storage = regression_table(30);
    assert!(!storage.has_column("outcome"));

    let report = Pipeline::new(regression_config())
        .unwrap()
        .run_storage(&storage)
        .unwrap();
    assert_eq!(report.run.status(), RunStatus::Success);
    assert_eq!(report.predictions.len(), 30);
    assert!(report.table.overall(Metric::Mae).is_some());
    assert!(report.table.overall(Metric::Auc).is_none());
}

#[test]
fn test_classification_table_still_needs_outcome_column() {
    let mut config = regression_config();
    config.task = Task::Classification;
    let err = Pipeline::new(config)
        .unwrap()
        .run_storage(&regression_table(30))
        .unwrap_err();
    assert!(matches!(err, Error::SchemaError { ref column, .. } if column == "outcome"));
}
