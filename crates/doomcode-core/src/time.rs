//! Wall-clock helpers.
//!
//! Everything on the wire carries unix milliseconds; the relay store keys
//! TTLs off unix seconds.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix time in milliseconds.
pub fn unix_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Current unix time in seconds.
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_seconds_agree() {
        let ms = unix_timestamp_ms();
        let s = unix_timestamp();
        // Within two seconds of each other.
        assert!((ms / 1000 - s).abs() <= 2);
    }

    #[test]
    fn timestamps_are_recent() {
        // Anything after 2024-01-01 counts as a sane clock.
        assert!(unix_timestamp_ms() > 1_704_067_200_000);
    }
}
