//! Wall-clock helpers
//!
//! Interval rollover runs on the monotonic clock; the functions here only
//! convert the wall-clock start/stop stamps that trackers report and encode.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, saturating at zero for pre-epoch times
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Inverse of [`unix_millis`]
pub fn from_unix_millis(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Duration as fractional milliseconds
#[inline]
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
