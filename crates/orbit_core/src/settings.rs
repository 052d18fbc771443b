use crate::{error::CycleError, traits::Scalar};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;

/// Iteration budget used when none is given.
pub const DEFAULT_MAX_ITERATIONS: usize = 1000;

/// Number of significant decimal digits carried by `T`.
pub fn working_digits<T: Scalar>() -> u32 {
    (-T::epsilon().log10()).floor().to_u32().unwrap_or(0)
}

/// Tolerance `5 * 10^-digits`.
/// Digit counts beyond `i32::MAX` saturate, which underflows to a zero tolerance
/// that `validate` rejects.
pub fn tolerance_for_digits<T: Scalar>(digits: u32) -> T {
    let five = T::from_u8(5).unwrap_or_else(T::one);
    let ten = T::from_u8(10).unwrap_or_else(T::one);
    let exponent = i32::try_from(digits).unwrap_or(i32::MAX).saturating_neg();
    five * ten.powi(exponent)
}

/// Default tolerance for `T`, derived from its working precision.
pub fn default_tolerance<T: Scalar>() -> T {
    tolerance_for_digits(working_digits::<T>())
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

/// Settings controlling the cycle search.
///
/// Both loop phases are bounded by `max_iterations` independently.
/// Missing fields fall back to their defaults when deserializing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "T: Serialize",
    deserialize = "T: Scalar + Deserialize<'de>"
))]
pub struct CycleSettings<T> {
    #[serde(default = "default_tolerance")]
    pub tolerance: T,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
}

impl<T: Scalar> Default for CycleSettings<T> {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl<T: Scalar> CycleSettings<T> {
    pub fn new(tolerance: T, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }

    pub fn with_tolerance(mut self, tolerance: T) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the tolerance to `5 * 10^-digits`.
    pub fn with_digits(self, digits: u32) -> Self {
        self.with_tolerance(tolerance_for_digits(digits))
    }

    pub fn validate(&self) -> Result<()> {
        self.check::<Infallible>()
            .context("Invalid cycle search settings.")
    }

    pub(crate) fn check<E>(&self) -> std::result::Result<(), CycleError<E>> {
        if !self.tolerance.is_finite() || self.tolerance <= T::zero() {
            return Err(CycleError::invalid_tolerance(self.tolerance));
        }
        if self.max_iterations == 0 {
            return Err(CycleError::InvalidMaxIterations);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{default_tolerance, tolerance_for_digits, working_digits, CycleSettings};

    fn assert_err_contains<T: std::fmt::Debug>(result: anyhow::Result<T>, needle: &str) {
        let err = result.expect_err("expected error");
        let message = format!("{err:#}");
        assert!(
            message.contains(needle),
            "expected error to contain \"{needle}\", got \"{message}\""
        );
    }

    #[test]
    fn working_digits_follow_float_precision() {
        assert_eq!(working_digits::<f64>(), 15);
        assert_eq!(working_digits::<f32>(), 6);
    }

    #[test]
    fn default_tolerance_scales_with_precision() {
        assert!((default_tolerance::<f64>() - 5e-15).abs() < 1e-27);
        assert!((default_tolerance::<f32>() - 5e-6).abs() < 1e-10);
        assert!((tolerance_for_digits::<f64>(3) - 5e-3).abs() < 1e-15);
    }

    #[test]
    fn defaults_and_builders() {
        let settings = CycleSettings::<f64>::default();
        assert_eq!(settings.max_iterations, 1000);
        assert!((settings.tolerance - 5e-15).abs() < 1e-27);

        let custom = settings.with_digits(8).with_max_iterations(50);
        assert!((custom.tolerance - 5e-8).abs() < 1e-20);
        assert_eq!(custom.max_iterations, 50);
        assert!(custom.validate().is_ok());
    }

    #[test]
    fn huge_digit_counts_saturate_instead_of_wrapping() {
        for digits in [400, 1u32 << 31, u32::MAX] {
            let tolerance = tolerance_for_digits::<f64>(digits);
            assert!(
                (0.0..1e-300).contains(&tolerance),
                "digits {digits} gave tolerance {tolerance}"
            );
        }

        let settings = CycleSettings::<f64>::default().with_digits(u32::MAX);
        assert_err_contains(settings.validate(), "tolerance");
        assert!((tolerance_for_digits::<f32>(u32::MAX)).abs() < 1e-30);
    }

    #[test]
    fn validate_rejects_bad_parameters() {
        assert_err_contains(CycleSettings::new(0.0, 10).validate(), "tolerance");
        assert_err_contains(CycleSettings::new(-1e-6, 10).validate(), "tolerance");
        assert_err_contains(CycleSettings::new(f64::NAN, 10).validate(), "tolerance");
        assert_err_contains(CycleSettings::new(1e-6, 0).validate(), "max_iterations");
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let settings: CycleSettings<f64> =
            serde_json::from_str(r#"{ "max_iterations": 64 }"#).expect("settings should parse");
        assert_eq!(settings.max_iterations, 64);
        assert!((settings.tolerance - 5e-15).abs() < 1e-27);

        let settings: CycleSettings<f64> =
            serde_json::from_str(r#"{ "tolerance": 1e-9 }"#).expect("settings should parse");
        assert!((settings.tolerance - 1e-9).abs() < 1e-21);
        assert_eq!(settings.max_iterations, 1000);

        let text = serde_json::to_string(&settings).expect("settings should serialize");
        let back: CycleSettings<f64> = serde_json::from_str(&text).expect("round trip");
        assert!((back.tolerance - settings.tolerance).abs() < 1e-21);
        assert_eq!(back.max_iterations, settings.max_iterations);
    }
}
