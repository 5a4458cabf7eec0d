//! Kinetics model tests: inversion, temperature correction, exclusions

use epiclock::data::Sample;
use epiclock::kinetics::{DecayLaw, KineticsModel, KineticsParameters};
use epiclock::Error;

fn reference_model() -> KineticsModel {
    KineticsModel::new(KineticsParameters::new(100.0, 0.05, 20.0, 50_000.0)).unwrap()
}

#[test]
fn test_reference_temperature_estimate() {
    // ln(100 / 36.79) / 0.05 ~= 20.0
    let t = reference_model().estimate_elapsed_time(36.79, 20.0).unwrap();
    assert!((t - 20.0).abs() < 0.01, "got {t}");
}

#[test]
fn test_full_concentration_is_time_zero() {
    let t = reference_model().estimate_elapsed_time(100.0, 20.0).unwrap();
    assert!(t.abs() < 1e-12);
}

#[test]
fn test_cold_storage_reads_longer() {
    let model = reference_model();
    let warm = model.estimate_elapsed_time(36.79, 20.0).unwrap();
    let cold = model.estimate_elapsed_time(36.79, 4.0).unwrap();
    assert!(cold > warm);
}

#[test]
fn test_zero_activation_energy_ignores_temperature() {
    let model = KineticsModel::new(KineticsParameters::new(100.0, 0.05, 20.0, 0.0)).unwrap();
    let a = model.estimate_elapsed_time(50.0, 4.0).unwrap();
    let b = model.estimate_elapsed_time(50.0, 37.0).unwrap();
    assert!((a - b).abs() < 1e-12);
}

#[test]
fn test_forward_and_inverse_agree() {
    let model = reference_model();
    for &(t, temp) in &[(0.5, 10.0), (12.0, 20.0), (48.0, 30.0)] {
        let c = model.concentration_at(t, temp).unwrap();
        let back = model.estimate_elapsed_time(c, temp).unwrap();
        assert!((back - t).abs() < 1e-9 * t.max(1.0));
    }
}

#[test]
fn test_double_exponential_round_trip() {
    let params = KineticsParameters::new(100.0, 0.02, 20.0, 40_000.0).with_law(
        DecayLaw::DoubleExponential {
            k_fast: 0.5,
            fast_weight: 0.3,
            tolerance: 1e-9,
            max_iterations: 200,
        },
    );
    let model = KineticsModel::new(params).unwrap();
    let c = model.concentration_at(15.0, 25.0).unwrap();
    let t = model.estimate_elapsed_time(c, 25.0).unwrap();
    assert!((t - 15.0).abs() < 1e-5, "got {t}");
}

#[test]
fn test_out_of_range_measurements() {
    let model = reference_model();
    for observed in [0.0, -1.0, 100.5, f64::NAN] {
        let err = model.estimate_elapsed_time(observed, 20.0).unwrap_err();
        assert!(matches!(err, Error::OutOfRangeMeasurement { .. }));
    }
}

#[test]
fn test_invalid_parameters_name_the_parameter() {
    let err = KineticsModel::new(KineticsParameters::new(0.0, 0.05, 20.0, 1.0)).unwrap_err();
    assert!(err.to_string().contains("`c0`"));
    let err = KineticsModel::new(KineticsParameters::new(100.0, -0.05, 20.0, 1.0)).unwrap_err();
    assert!(err.to_string().contains("`k`"));
}

#[test]
fn test_estimate_samples_excludes_and_continues() {
    let samples = vec![
        Sample::builder("a", 10.0).feature("atp", 50.0).build(),
        Sample::builder("b", 11.0).feature("atp", 150.0).build(),
        Sample::builder("c", 12.0).feature("atp", 25.0).build(),
    ];
    let estimates = reference_model().estimate_samples(&samples, "atp").unwrap();

    assert_eq!(estimates.values.len(), 3);
    assert!(estimates.values[0].is_some());
    assert!(estimates.values[1].is_none());
    assert!(estimates.values[2].unwrap() > estimates.values[0].unwrap());
    assert_eq!(estimates.excluded.len(), 1);
    assert_eq!(estimates.excluded[0].sample_id, "b");
    assert!(estimates.excluded[0].reason.contains("sample b"));
}

#[test]
fn test_parameters_from_json() {
    let params: KineticsParameters = serde_json::from_str(
        r#"{
            "c0": 100.0, "k": 0.05,
            "reference_temperature": 20.0, "activation_energy": 50000.0,
            "law": { "kind": "double_exponential", "k_fast": 0.4, "fast_weight": 0.25 }
        }"#,
    )
    .unwrap();
    assert!((params.gas_constant - 8.314).abs() < f64::EPSILON);
    assert!(matches!(
        params.law,
        DecayLaw::DoubleExponential { max_iterations: 200, .. }
    ));
}
