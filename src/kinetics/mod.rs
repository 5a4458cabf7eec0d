//! Degradation kinetics: concentration -> elapsed time
//!
//! Forward law (single pool): `C(t) = C0 * exp(-k_eff * t)`, with the
//! Arrhenius-corrected rate `k_eff = k * exp(-Ea/R * (1/T - 1/T0))`.
//! Temperatures are supplied in degrees Celsius and converted to Kelvin.
//!
//! The double-exponential law mixes a fast and a slow pool and has no
//! closed-form inverse, so it is solved by bracketing plus bisection.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::data::Sample;
use crate::{Error, Result};

/// Offset between Celsius and Kelvin.
pub const KELVIN_OFFSET: f64 = 273.15;

/// Molar gas constant, J/(mol*K).
pub const GAS_CONSTANT: f64 = 8.314;

/// Decay law selecting how concentration falls with time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecayLaw {
    /// One pool, rate `k`.
    SingleExponential,
    /// Fast pool (rate `k_fast`, weight `fast_weight`) plus a slow pool
    /// decaying at the base rate `k`.
    DoubleExponential {
        /// Rate of the fast pool.
        k_fast: f64,
        /// Mixing weight of the fast pool, in (0, 1).
        fast_weight: f64,
        /// Relative tolerance on `t` for the root-find.
        #[serde(default = "default_tolerance")]
        tolerance: f64,
        /// Iteration budget for bracketing plus bisection.
        #[serde(default = "default_max_iterations")]
        max_iterations: usize,
    },
}

const fn default_tolerance() -> f64 {
    1e-6
}

const fn default_max_iterations() -> usize {
    200
}

/// Constants for one kinetics model instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KineticsParameters {
    /// Initial concentration `C0`.
    pub c0: f64,
    /// Rate constant `k` at the reference temperature.
    pub k: f64,
    /// Reference temperature `T0` (°C).
    pub reference_temperature: f64,
    /// Activation energy `Ea` (J/mol).
    pub activation_energy: f64,
    /// Gas constant `R`.
    #[serde(default = "default_gas_constant")]
    pub gas_constant: f64,
    /// Decay law.
    #[serde(default = "default_law")]
    pub law: DecayLaw,
}

const fn default_gas_constant() -> f64 {
    GAS_CONSTANT
}

const fn default_law() -> DecayLaw {
    DecayLaw::SingleExponential
}

impl KineticsParameters {
    /// Single-exponential parameters with the default gas constant.
    #[must_use]
    pub const fn new(c0: f64, k: f64, reference_temperature: f64, activation_energy: f64) -> Self {
        Self {
            c0,
            k,
            reference_temperature,
            activation_energy,
            gas_constant: GAS_CONSTANT,
            law: DecayLaw::SingleExponential,
        }
    }

    /// Replace the decay law.
    #[must_use]
    pub const fn with_law(mut self, law: DecayLaw) -> Self {
        self.law = law;
        self
    }

    /// Check every constant.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModelParameters` naming the first offending constant.
    pub fn validate(&self) -> Result<()> {
        if !(self.c0.is_finite() && self.c0 > 0.0) {
            return Err(Error::model_parameter("c0", format!("must be > 0, got {}", self.c0)));
        }
        if !(self.k.is_finite() && self.k > 0.0) {
            return Err(Error::model_parameter("k", format!("must be > 0, got {}", self.k)));
        }
        if !(self.gas_constant.is_finite() && self.gas_constant > 0.0) {
            return Err(Error::model_parameter(
                "gas_constant",
                format!("must be > 0, got {}", self.gas_constant),
            ));
        }
        if !(self.activation_energy.is_finite() && self.activation_energy >= 0.0) {
            return Err(Error::model_parameter(
                "activation_energy",
                format!("must be finite and >= 0, got {}", self.activation_energy),
            ));
        }
        if !(self.reference_temperature + KELVIN_OFFSET > 0.0) {
            return Err(Error::model_parameter(
                "reference_temperature",
                format!("below absolute zero: {}", self.reference_temperature),
            ));
        }
        if let DecayLaw::DoubleExponential {
            k_fast,
            fast_weight,
            tolerance,
            max_iterations,
        } = self.law
        {
            if !(k_fast.is_finite() && k_fast > 0.0) {
                return Err(Error::model_parameter("k_fast", format!("must be > 0, got {k_fast}")));
            }
            if !(fast_weight > 0.0 && fast_weight < 1.0) {
                return Err(Error::model_parameter(
                    "fast_weight",
                    format!("must be in (0, 1), got {fast_weight}"),
                ));
            }
            if !(tolerance.is_finite() && tolerance > 0.0) {
                return Err(Error::model_parameter(
                    "tolerance",
                    format!("must be > 0, got {tolerance}"),
                ));
            }
            if max_iterations == 0 {
                return Err(Error::model_parameter("max_iterations", "must be > 0"));
            }
        }
        Ok(())
    }
}

/// Elapsed-time estimator over a fixed parameter set.
///
/// Stateless apart from its constants, so it can be shared across threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KineticsModel {
    params: KineticsParameters,
}

impl KineticsModel {
    /// Create a model, validating the constants.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModelParameters` for malformed constants.
    pub fn new(params: KineticsParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Model constants.
    #[must_use]
    pub const fn params(&self) -> &KineticsParameters {
        &self.params
    }

    /// Arrhenius multiplier `exp(-Ea/R * (1/T - 1/T0))` at `temperature` (°C).
    ///
    /// # Errors
    ///
    /// Returns `InvalidTemperature` when the temperature is missing (NaN),
    /// infinite, or at or below absolute zero.
    pub fn arrhenius_factor(&self, temperature: f64) -> Result<f64> {
        let t = temperature + KELVIN_OFFSET;
        if !(t.is_finite() && t > 0.0) {
            return Err(Error::InvalidTemperature {
                sample_id: String::new(),
                temperature,
            });
        }
        let t0 = self.params.reference_temperature + KELVIN_OFFSET;
        let exponent =
            -self.params.activation_energy / self.params.gas_constant * (1.0 / t - 1.0 / t0);
        Ok(exponent.exp())
    }

    /// Temperature-corrected rate for the base (slow) pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidModelParameters` if the corrected rate is not a
    /// positive finite number.
    pub fn effective_rate(&self, temperature: f64) -> Result<f64> {
        let k_eff = self.params.k * self.arrhenius_factor(temperature)?;
        if !(k_eff.is_finite() && k_eff > 0.0) {
            return Err(Error::model_parameter(
                "k_eff",
                format!("corrected rate must be > 0, got {k_eff} at {temperature} °C"),
            ));
        }
        Ok(k_eff)
    }

    /// Forward law: concentration remaining after `elapsed` at `temperature`.
    ///
    /// # Errors
    ///
    /// Propagates rate-correction failures.
    pub fn concentration_at(&self, elapsed: f64, temperature: f64) -> Result<f64> {
        let factor = self.arrhenius_factor(temperature)?;
        let k_slow = self.effective_rate(temperature)?;
        Ok(match self.params.law {
            DecayLaw::SingleExponential => self.params.c0 * (-k_slow * elapsed).exp(),
            DecayLaw::DoubleExponential {
                k_fast,
                fast_weight,
                ..
            } => {
                self.params.c0
                    * fast_weight.mul_add(
                        (-k_fast * factor * elapsed).exp(),
                        (1.0 - fast_weight) * (-k_slow * elapsed).exp(),
                    )
            }
        })
    }

    /// Invert the decay law.
    ///
    /// # Errors
    ///
    /// - `OutOfRangeMeasurement` unless `0 < observed <= C0`
    /// - `InvalidTemperature` for a missing or sub-absolute-zero temperature
    /// - `InvalidModelParameters` if the corrected rate is not positive
    /// - `ConvergenceFailure` if the double-exponential root-find runs out
    ///   of iterations
    pub fn estimate_elapsed_time(&self, observed: f64, temperature: f64) -> Result<f64> {
        let c0 = self.params.c0;
        if !(observed.is_finite() && observed > 0.0 && observed <= c0) {
            return Err(Error::OutOfRangeMeasurement {
                sample_id: String::new(),
                observed,
                c0,
            });
        }
        let k_eff = self.effective_rate(temperature)?;
        match self.params.law {
            DecayLaw::SingleExponential => Ok(-(observed / c0).ln() / k_eff),
            DecayLaw::DoubleExponential {
                tolerance,
                max_iterations,
                ..
            } => self.solve_double(observed, temperature, tolerance, max_iterations),
        }
    }

    /// Bracket then bisect; `C(t)` is strictly decreasing so the root is unique.
    fn solve_double(
        &self,
        observed: f64,
        temperature: f64,
        tolerance: f64,
        max_iterations: usize,
    ) -> Result<f64> {
        if observed >= self.params.c0 {
            return Ok(0.0);
        }
        let mut lo = 0.0_f64;
        let mut hi = 1.0 / self.effective_rate(temperature)?;
        let mut iterations = 0;
        while self.concentration_at(hi, temperature)? > observed {
            iterations += 1;
            if iterations >= max_iterations || !hi.is_finite() {
                return Err(Error::ConvergenceFailure {
                    sample_id: String::new(),
                    iterations,
                });
            }
            lo = hi;
            hi *= 2.0;
        }
        while iterations < max_iterations {
            iterations += 1;
            let mid = 0.5 * (lo + hi);
            if self.concentration_at(mid, temperature)? > observed {
                lo = mid;
            } else {
                hi = mid;
            }
            if hi - lo <= tolerance * hi.max(f64::MIN_POSITIVE) {
                return Ok(0.5 * (lo + hi));
            }
        }
        Err(Error::ConvergenceFailure {
            sample_id: String::new(),
            iterations,
        })
    }

    /// Apply the model to every sample, reading the observed concentration
    /// from `column`.
    ///
    /// Sample-level failures are collected in [`KineticsEstimates::excluded`]
    /// instead of aborting.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if a sample lacks `column`, and
    /// `InvalidModelParameters` if the rate correction fails.
    pub fn estimate_samples(&self, samples: &[Sample], column: &str) -> Result<KineticsEstimates> {
        let mut values = Vec::with_capacity(samples.len());
        let mut excluded = Vec::new();
        for sample in samples {
            let observed = sample.feature(column).ok_or_else(|| {
                Error::schema(column, format!("missing for sample {}", sample.id()))
            })?;
            match self.estimate_elapsed_time(observed, sample.temperature()) {
                Ok(t) => values.push(Some(t)),
                Err(e) if e.is_sample_level() => {
                    let e = e.for_sample(sample.id());
                    warn!(error = %e, "excluding sample from kinetics estimate");
                    excluded.push(ExcludedSample {
                        sample_id: sample.id().to_string(),
                        reason: e.to_string(),
                    });
                    values.push(None);
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            estimated = values.len() - excluded.len(),
            excluded = excluded.len(),
            "kinetics estimates computed"
        );
        Ok(KineticsEstimates { values, excluded })
    }
}

/// A sample whose derived feature could not be computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedSample {
    /// Sample identifier.
    pub sample_id: String,
    /// Rendered condition.
    pub reason: String,
}

/// Per-sample estimates aligned with the input order.
#[derive(Debug, Clone, PartialEq)]
pub struct KineticsEstimates {
    /// `None` where the sample was excluded.
    pub values: Vec<Option<f64>>,
    /// Excluded samples with reasons.
    pub excluded: Vec<ExcludedSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> KineticsModel {
        KineticsModel::new(KineticsParameters::new(100.0, 0.05, 20.0, 50_000.0)).unwrap()
    }

    #[test]
    fn test_reference_temperature_scenario() {
        let t = model().estimate_elapsed_time(36.79, 20.0).unwrap();
        assert!((t - 20.0).abs() < 1e-2, "got {t}");
    }

    #[test]
    fn test_cold_sample_reads_longer() {
        let m = model();
        let warm = m.estimate_elapsed_time(36.79, 20.0).unwrap();
        let cold = m.estimate_elapsed_time(36.79, 4.0).unwrap();
        assert!(cold > warm);
        assert!(m.effective_rate(4.0).unwrap() < 0.05);
    }

    #[test]
    fn test_full_concentration_is_zero_time() {
        assert!(model().estimate_elapsed_time(100.0, 20.0).unwrap().abs() < 1e-12);
    }

    #[test]
    fn test_out_of_range() {
        let m = model();
        for observed in [0.0, -1.0, 100.5, f64::NAN] {
            assert!(matches!(
                m.estimate_elapsed_time(observed, 20.0),
                Err(Error::OutOfRangeMeasurement { .. })
            ));
        }
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            KineticsModel::new(KineticsParameters::new(0.0, 0.05, 20.0, 0.0)),
            Err(Error::InvalidModelParameters { ref parameter, .. }) if parameter == "c0"
        ));
        assert!(matches!(
            KineticsModel::new(KineticsParameters::new(1.0, -0.05, 20.0, 0.0)),
            Err(Error::InvalidModelParameters { ref parameter, .. }) if parameter == "k"
        ));
    }

    #[test]
    fn test_double_exponential_round_trip() {
        let params = KineticsParameters::new(100.0, 0.02, 20.0, 40_000.0).with_law(
            DecayLaw::DoubleExponential {
                k_fast: 0.5,
                fast_weight: 0.3,
                tolerance: 1e-9,
                max_iterations: 500,
            },
        );
        let m = KineticsModel::new(params).unwrap();
        let c = m.concentration_at(12.5, 25.0).unwrap();
        let t = m.estimate_elapsed_time(c, 25.0).unwrap();
        assert!((t - 12.5).abs() < 1e-6, "got {t}");
    }

    #[test]
    fn test_double_exponential_convergence_failure() {
        let params = KineticsParameters::new(100.0, 0.02, 20.0, 0.0).with_law(
            DecayLaw::DoubleExponential {
                k_fast: 0.5,
                fast_weight: 0.3,
                tolerance: 1e-12,
                max_iterations: 3,
            },
        );
        let m = KineticsModel::new(params).unwrap();
        assert!(matches!(
            m.estimate_elapsed_time(1.0, 20.0),
            Err(Error::ConvergenceFailure { .. })
        ));
    }

    #[test]
    fn test_estimate_samples_excludes_out_of_range() {
        let samples = vec![
            Sample::builder("ok", 1.0).feature("conc", 50.0).build(),
            Sample::builder("bad", 1.0).feature("conc", 150.0).build(),
        ];
        let est = model().estimate_samples(&samples, "conc").unwrap();
        assert!(est.values[0].is_some());
        assert!(est.values[1].is_none());
        assert_eq!(est.excluded.len(), 1);
        assert_eq!(est.excluded[0].sample_id, "bad");
        assert!(est.excluded[0].reason.contains("bad"));
    }

    #[test]
    fn test_bad_temperature_is_per_sample() {
        assert!(matches!(
            model().estimate_elapsed_time(50.0, f64::NAN),
            Err(Error::InvalidTemperature { .. })
        ));
        let samples = vec![
            Sample::builder("warm", 1.0).feature("conc", 50.0).build(),
            Sample::builder("unknown", 1.0)
                .temperature(f64::NAN)
                .feature("conc", 50.0)
                .build(),
            Sample::builder("frozen", 1.0)
                .temperature(-300.0)
                .feature("conc", 50.0)
                .build(),
        ];
        let est = model().estimate_samples(&samples, "conc").unwrap();
        assert!(est.values[0].is_some());
        assert_eq!(est.values[1..], [None, None]);
        let ids: Vec<&str> = est.excluded.iter().map(|e| e.sample_id.as_str()).collect();
        assert_eq!(ids, ["unknown", "frozen"]);
        assert!(est.excluded[0].reason.contains("unknown"));
    }

    #[test]
    fn test_estimate_samples_missing_column() {
        let samples = vec![Sample::builder("s", 1.0).build()];
        assert!(matches!(
            model().estimate_samples(&samples, "conc"),
            Err(Error::SchemaError { .. })
        ));
    }
}
