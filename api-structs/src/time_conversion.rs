use chrono::{DateTime, Utc};
use std::time::Duration;

pub const MICROS_IN_1_MS: u64 = 1_000;
pub const MILLIS_IN_1_MINUTE: i64 = 60_000;

/// Span documents store `startTime` as microseconds since the epoch
pub fn time_to_micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros()
}

/// Span documents also carry `startTimeMillis`, used by the aggregation queries
pub fn time_to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

// saturates instead of panicking, a u64 of micros is ~584k years
pub fn duration_to_micros(duration: Duration) -> u64 {
    u64::try_from(duration.as_micros()).unwrap_or(u64::MAX)
}

pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn micros_to_millis(micros: f64) -> f64 {
    micros / MICROS_IN_1_MS as f64
}

#[test]
fn duration_conversions_dont_panic() {
    assert_eq!(duration_to_micros(Duration::MAX), u64::MAX);
    assert_eq!(duration_to_millis(Duration::from_millis(100)), 100);
    assert_eq!(duration_to_micros(Duration::from_millis(100)), 100_000);
}

#[test]
fn micros_to_millis_keeps_fraction() {
    assert_eq!(micros_to_millis(1_500.0), 1.5);
}

#[test]
fn epoch_conversions_agree() {
    let time = DateTime::parse_from_rfc3339("2020-01-01T00:00:00.250Z")
        .unwrap()
        .with_timezone(&Utc);
    assert_eq!(time_to_micros(time), 1_577_836_800_250_000);
    assert_eq!(time_to_millis(time), 1_577_836_800_250);
}
