//! Utility functions for rounding and date formatting shared across modules.

use chrono::{DateTime, Local, SecondsFormat, Utc};

/// Round to the nearest integer, with halves going toward positive infinity.
///
/// `f64::round` rounds halves away from zero, which differs for negative values
/// (-2.5 becomes -3 instead of -2).
pub fn round_half_up(value: f64) -> f64 {
    // adding 0.5 first would round 0.49999999999999994 up
    let floor = value.floor();
    if value - floor >= 0.5 { floor + 1.0 } else { floor }
}

/// Round to `decimals` places using [`round_half_up`].
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    round_half_up(value * factor) / factor
}

/// Integer form of [`round_half_up`], for counts and averages reported as whole numbers.
pub fn round_to_i64(value: f64) -> i64 {
    round_half_up(value) as i64
}

/// Current local date as `YYYY-MM-DD`, the form the wearable API expects in paths.
pub fn local_date_string() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

/// ISO-8601 form used in device-store time filters.
pub fn iso8601(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Format a metric reading with exactly one decimal place.
pub fn one_decimal(value: f64) -> String {
    format!("{:.1}", round_to(value, 1))
}
