//! Threshold helpers shared by the rate-based rules.

use crate::error::CoreError;

/// Validate that a fraction falls within `[0.0, 1.0]`.
///
/// Returns a `CoreError::Validation` naming the parameter if out of range.
pub fn validate_unit_range(value: f64, name: &str) -> Result<(), CoreError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CoreError::Validation(format!(
            "{name} must be between 0.0 and 1.0, got {value}"
        )));
    }
    Ok(())
}

/// `part / total`, or `None` when there is nothing to divide.
pub fn ratio(part: i64, total: i64) -> Option<f64> {
    (total > 0).then(|| part as f64 / total as f64)
}

/// Percentage of `total`, rounded to two decimals.
pub fn percent(part: i64, total: i64) -> f64 {
    match ratio(part, total) {
        Some(r) => (r * 10_000.0).round() / 100.0,
        None => 0.0,
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Whether two figures agree within an absolute tolerance.
pub fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance + f64::EPSILON
}
