//! Glucose readings and upstream normalization.
//!
//! The upstream API reports glucose in mmol/L with second-precision UTC
//! timestamps. Everything downstream of the fetch works in mg/dL, so the
//! conversion happens here, at the boundary, and nowhere else.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversion factor from mmol/L to mg/dL (molar mass of glucose / 10).
pub const MMOL_TO_MGDL: f64 = 18.01559;

/// Upstream timestamp format: UTC, whole seconds, literal `Z` suffix.
const UPSTREAM_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One glucose measurement, normalized to mg/dL.
///
/// Immutable once constructed. Produced by the upstream session, consumed
/// by the publish gate and the payload serializer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Glucose concentration in mg/dL
    pub value_mgdl: f64,
    /// Measurement instant (UTC)
    pub timestamp: DateTime<Utc>,
}

impl Reading {
    /// Create a reading from an already-normalized mg/dL value.
    #[must_use]
    pub fn new(value_mgdl: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            value_mgdl,
            timestamp,
        }
    }

    /// Create a reading from a raw upstream record: an mmol/L value and a
    /// `YYYY-MM-DDTHH:MM:SSZ` timestamp string.
    ///
    /// # Errors
    ///
    /// Returns error if the timestamp does not match the upstream format.
    pub fn from_upstream(value_mmol: f64, time: &str) -> Result<Self, ReadingError> {
        Ok(Self {
            value_mgdl: mmol_to_mgdl(value_mmol),
            timestamp: parse_upstream_time(time)?,
        })
    }

    /// The value rounded to a whole mg/dL, as published downstream.
    ///
    /// Physiological values sit in the tens to hundreds of mg/dL,
    /// nowhere near the integer range.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn rounded_mgdl(&self) -> i64 {
        self.value_mgdl.round() as i64
    }
}

/// Convert a glucose concentration from mmol/L to mg/dL.
#[must_use]
pub fn mmol_to_mgdl(value_mmol: f64) -> f64 {
    value_mmol * MMOL_TO_MGDL
}

/// Parse an upstream timestamp string, strictly.
///
/// Accepts exactly `YYYY-MM-DDTHH:MM:SSZ` and attaches the UTC zone.
/// Numeric offsets, fractional seconds, and trailing input are rejected;
/// a malformed timestamp is an error for the caller to log, never a panic.
///
/// # Errors
///
/// Returns error if the string does not match the format.
pub fn parse_upstream_time(time: &str) -> Result<DateTime<Utc>, ReadingError> {
    NaiveDateTime::parse_from_str(time, UPSTREAM_TIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| {
            tracing::debug!(timestamp = time, error = %e, "Rejected upstream timestamp");
            ReadingError::BadTimestamp {
                value: time.to_string(),
                reason: e.to_string(),
            }
        })
}

/// Errors constructing a reading from upstream data.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReadingError {
    /// Timestamp string did not match the upstream format
    #[error("bad timestamp '{value}': {reason}")]
    BadTimestamp {
        /// The rejected string
        value: String,
        /// Parser diagnostic
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn conversion_is_exact() {
        for x in [0.0, 1.0, 3.9, 5.5, 10.0, 22.2] {
            assert_eq!(mmol_to_mgdl(x), x * 18.01559);
        }
    }

    #[test]
    fn parse_valid_timestamp() {
        let ts = parse_upstream_time("2024-02-12T15:15:00Z").unwrap();
        assert_eq!(ts.hour(), 15);
        assert_eq!(ts.to_rfc3339(), "2024-02-12T15:15:00+00:00");
    }

    #[test]
    fn parse_rejects_offset_form() {
        assert!(parse_upstream_time("2024-02-12T15:15:00+00:00").is_err());
    }

    #[test]
    fn parse_rejects_missing_zone() {
        assert!(parse_upstream_time("2024-02-12T15:15:00").is_err());
    }

    #[test]
    fn parse_rejects_trailing_input() {
        assert!(parse_upstream_time("2024-02-12T15:15:00Zjunk").is_err());
    }

    #[test]
    fn parse_rejects_fractional_seconds() {
        assert!(parse_upstream_time("2024-02-12T15:15:00.250Z").is_err());
    }

    #[test]
    fn from_upstream_converts_and_parses() {
        let reading = Reading::from_upstream(5.5, "2024-02-12T15:15:00Z").unwrap();
        assert_eq!(reading.value_mgdl, 5.5 * 18.01559);
        assert_eq!(reading.rounded_mgdl(), 99);
    }

    #[test]
    fn rounding_is_to_nearest() {
        let ts = parse_upstream_time("2024-02-12T15:15:00Z").unwrap();
        assert_eq!(Reading::new(104.4, ts).rounded_mgdl(), 104);
        assert_eq!(Reading::new(104.6, ts).rounded_mgdl(), 105);
    }

    #[test]
    fn bad_timestamp_keeps_the_input() {
        let err = Reading::from_upstream(5.5, "not-a-time").unwrap_err();
        let ReadingError::BadTimestamp { value, .. } = err;
        assert_eq!(value, "not-a-time");
    }
}
