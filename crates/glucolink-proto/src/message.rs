//! Publish payload for glucose readings.

use chrono::{DateTime, SecondsFormat, Utc};
use glucolink_core::Reading;
use serde::{Deserialize, Serialize};

/// The JSON payload published for one reading.
///
/// ```json
/// {"value": 104, "timestamp": "2024-02-12T15:15:00Z"}
/// ```
///
/// The value is rounded to a whole mg/dL; downstream displays have no use
/// for sub-unit precision and the rounded form keeps the payload stable
/// across float formatting differences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlucoseMessage {
    /// Glucose value in mg/dL, rounded
    pub value: i64,
    /// Measurement instant, RFC 3339 UTC with `Z` suffix
    pub timestamp: String,
}

impl GlucoseMessage {
    /// Build the payload for a reading.
    #[must_use]
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            value: reading.rounded_mgdl(),
            timestamp: format_timestamp(reading.timestamp),
        }
    }

    /// Serialize to the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, PayloadError> {
        serde_json::to_string(self).map_err(|e| PayloadError::Serialize(e.to_string()))
    }

    /// Deserialize from the JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns error if the payload is not a valid message.
    pub fn from_json(payload: &str) -> Result<Self, PayloadError> {
        serde_json::from_str(payload).map_err(|e| PayloadError::Deserialize(e.to_string()))
    }
}

/// Render a UTC instant in the wire form: RFC 3339, whole seconds, `Z`.
#[must_use]
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Errors for payload serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PayloadError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}
