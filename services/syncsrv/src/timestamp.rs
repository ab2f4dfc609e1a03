//! Timestamp codec for the platform's 13-digit epoch values
//!
//! The platform writes epoch seconds with millisecond precision and the
//! decimal point dropped (`1582147684.275` -> `1582147684275`). Conversion
//! keeps whole seconds only.

use chrono::{DateTime, TimeZone, Utc};
use errors::{SyncError, SyncResult};

const MIN_13_DIGIT: i64 = 1_000_000_000_000;
const MAX_13_DIGIT: i64 = 9_999_999_999_999;

/// Decode a 13-digit epoch value into an instant, truncated to the second
pub fn to_instant(millis_epoch_13: i64) -> SyncResult<DateTime<Utc>> {
    if !(MIN_13_DIGIT..=MAX_13_DIGIT).contains(&millis_epoch_13) {
        return Err(SyncError::InvalidTimestamp {
            value: millis_epoch_13,
        });
    }

    let seconds = millis_epoch_13 / 1000;
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or(SyncError::InvalidTimestamp {
            value: millis_epoch_13,
        })
}

/// Encode an instant as a 13-digit epoch value (sub-second part dropped)
pub fn to_millis_epoch_13(instant: DateTime<Utc>) -> i64 {
    instant.timestamp() * 1000
}
