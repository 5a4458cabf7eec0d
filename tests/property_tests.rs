//! Property-based tests for epiclock
//!
//! - Test mathematical invariants of each stage
//! - Run with ProptestConfig::with_cases(100)
//! - Keep inputs small so the suite stays fast

use epiclock::clock::DriftScorer;
use epiclock::data::FeatureMatrix;
use epiclock::evaluate::folds::{assign_folds, split, Strata};
use epiclock::experiment::{AggregationConfig, FoldId, Metric, MetricRecord, MetricsAggregator};
use epiclock::kinetics::{KineticsModel, KineticsParameters};
use epiclock::model::IsotonicCalibrator;
use proptest::prelude::*;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Valid single-exponential parameters
fn arb_kinetics() -> impl Strategy<Value = KineticsParameters> {
    (1.0f64..500.0, 0.001f64..1.0, 0.0f64..40.0, 0.0f64..120_000.0)
        .prop_map(|(c0, k, t0, ea)| KineticsParameters::new(c0, k, t0, ea))
}

/// Matrix of `rows x cols` methylation-like values plus reference times
fn arb_cohort(rows: usize, cols: usize) -> impl Strategy<Value = (FeatureMatrix, Vec<f64>)> {
    (
        proptest::collection::vec(proptest::collection::vec(0.0f64..1.0, cols), rows),
        proptest::collection::vec(0.0f64..100.0, rows),
    )
        .prop_map(move |(data, reference)| {
            let columns = (0..cols).map(|j| format!("cg{j:04}")).collect();
            (FeatureMatrix::from_rows(columns, &data).unwrap(), reference)
        })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: forward law then inversion returns the elapsed time
    #[test]
    fn prop_kinetics_round_trip(
        params in arb_kinetics(),
        elapsed in 0.0f64..50.0,
        temperature in -10.0f64..40.0,
    ) {
        let model = KineticsModel::new(params).unwrap();
        let c = model.concentration_at(elapsed, temperature).unwrap();
        prop_assume!(c > params.c0 * 1e-12);
        let back = model.estimate_elapsed_time(c, temperature).unwrap();
        prop_assert!((back - elapsed).abs() <= 1e-6 * elapsed.max(1.0));
    }

    /// Property: less remaining concentration means more elapsed time
    #[test]
    fn prop_kinetics_monotone(
        params in arb_kinetics(),
        a in 0.01f64..1.0,
        b in 0.01f64..1.0,
        temperature in 0.0f64..37.0,
    ) {
        prop_assume!((a - b).abs() > 1e-6);
        let model = KineticsModel::new(params).unwrap();
        let (hi, lo) = if a > b { (a, b) } else { (b, a) };
        let t_hi = model.estimate_elapsed_time(hi * params.c0, temperature).unwrap();
        let t_lo = model.estimate_elapsed_time(lo * params.c0, temperature).unwrap();
        prop_assert!(t_lo > t_hi);
    }

    /// Property: clock fit is bit-reproducible for a fixed seed
    #[test]
    fn prop_clock_reproducible(
        (x, reference) in arb_cohort(12, 8),
        seed in any::<u64>(),
    ) {
        let scorer = DriftScorer { max_features: 5, ..DriftScorer::default() };
        let a = scorer.fit(&x, &reference, seed).unwrap();
        let b = scorer.fit(&x, &reference, seed).unwrap();
        prop_assert_eq!(&a, &b);
        let drift = DriftScorer::score(&x, &reference, &a).unwrap().drift;
        prop_assert_eq!(drift.len(), 12);
    }

    /// Property: every sample lands in exactly one fold and sizes differ by at most one
    #[test]
    fn prop_folds_partition(
        values in proptest::collection::vec(0.0f64..100.0, 10..60),
        k in 2usize..6,
        seed in any::<u64>(),
    ) {
        let assignment = assign_folds(Strata::Quantile(&values), k, seed).unwrap();
        let mut sizes = vec![0usize; k];
        for fold in 0..k {
            let (train, test) = split(&assignment, fold);
            prop_assert_eq!(train.len() + test.len(), values.len());
            sizes[fold] = test.len();
        }
        prop_assert_eq!(sizes.iter().sum::<usize>(), values.len());
        prop_assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
    }

    /// Property: isotonic output is non-decreasing in the score
    #[test]
    fn prop_isotonic_monotone(
        pairs in proptest::collection::vec((0.0f64..1.0, any::<bool>()), 2..80),
        probes in proptest::collection::vec(-0.5f64..1.5, 2..20),
    ) {
        let scores: Vec<f64> = pairs.iter().map(|(s, _)| *s).collect();
        let outcomes: Vec<f64> = pairs.iter().map(|(_, o)| f64::from(u8::from(*o))).collect();
        let calibrator = IsotonicCalibrator::fit(&scores, &outcomes);

        let mut sorted = probes;
        sorted.sort_by(f64::total_cmp);
        let mapped = calibrator.apply_all(&sorted);
        for pair in mapped.windows(2) {
            prop_assert!(pair[0] <= pair[1] + 1e-12);
        }
        prop_assert!(mapped.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    /// Property: overall interval always brackets the fold mean
    #[test]
    fn prop_ci_contains_mean(
        values in proptest::collection::vec(0.0f64..1.0, 2..10),
        seed in any::<u64>(),
    ) {
        let records: Vec<MetricRecord> = values
            .iter()
            .enumerate()
            .map(|(i, v)| MetricRecord::builder("p", FoldId::Index(i), Metric::Auc, *v).n(20).build())
            .collect();
        let config = AggregationConfig { bootstrap_iterations: 200, ..AggregationConfig::default() };
        let table = MetricsAggregator::new(config, seed).aggregate(&records);
        let overall = table.overall(Metric::Auc).unwrap();
        prop_assert!(overall.ci_low().unwrap() <= overall.value());
        prop_assert!(overall.value() <= overall.ci_high().unwrap());
        prop_assert_eq!(table.len(), values.len() + 1);
    }
}
