//! Publish gating: change threshold and heartbeat decisions.
//!
//! The gate is a pure decision rule. It never performs I/O and holds no
//! interior state; the poll loop owns the [`PublishState`] and threads it
//! through every evaluation.

use crate::reading::Reading;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default change threshold, in percent of the previously published value.
pub const DEFAULT_THRESHOLD_PERCENT: f64 = 10.0;

/// Default heartbeat interval: force a publish once this much time has
/// passed since the last one, even without a qualifying change.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// What was last sent downstream.
///
/// Initially empty. Mutated only by the poll loop, and only after a
/// publish succeeded, so a failed publish is retried by the next
/// qualifying poll.
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishState {
    /// Last published reading, if any
    pub last: Option<Reading>,
    /// Instant of the last successful publish
    pub published_at: Option<DateTime<Utc>>,
}

impl PublishState {
    /// Record a successful publish.
    pub fn record(&mut self, reading: Reading, at: DateTime<Utc>) {
        self.last = Some(reading);
        self.published_at = Some(at);
    }
}

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    /// Nothing published yet; always publish
    FirstReading,
    /// Change against the last published value exceeds the threshold
    ThresholdExceeded,
    /// No qualifying change, but the heartbeat interval elapsed
    HeartbeatDue,
    /// Within threshold and heartbeat not due; skip
    Unchanged,
}

impl PublishDecision {
    /// Whether this decision results in a publish.
    #[must_use]
    pub fn is_publish(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Decides whether a freshly polled reading is worth republishing.
#[derive(Debug, Clone, Copy)]
pub struct PublishGate {
    /// Minimum relative change, in percent of the previous value
    pub threshold_percent: f64,
    /// Maximum quiet period between publishes
    pub heartbeat_interval: Duration,
}

impl Default for PublishGate {
    fn default() -> Self {
        Self {
            threshold_percent: DEFAULT_THRESHOLD_PERCENT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

impl PublishGate {
    /// True iff `current` differs from `previous` by strictly more than
    /// the threshold, relative to `previous`.
    #[must_use]
    pub fn exceeds_threshold(&self, previous: &Reading, current: &Reading) -> bool {
        let limit = previous.value_mgdl * self.threshold_percent / 100.0;
        (current.value_mgdl - previous.value_mgdl).abs() > limit
    }

    /// Evaluate the gate for a freshly polled reading.
    ///
    /// The threshold is checked first; the heartbeat only ever adds a
    /// publish, it never suppresses one.
    #[must_use]
    pub fn decide(
        &self,
        state: &PublishState,
        current: &Reading,
        now: DateTime<Utc>,
    ) -> PublishDecision {
        let Some(previous) = state.last.as_ref() else {
            return PublishDecision::FirstReading;
        };

        if self.exceeds_threshold(previous, current) {
            return PublishDecision::ThresholdExceeded;
        }

        if self.heartbeat_due(state.published_at, now) {
            return PublishDecision::HeartbeatDue;
        }

        PublishDecision::Unchanged
    }

    /// True once `heartbeat_interval` has elapsed since the last publish.
    /// A clock stepping backwards reads as "not yet due".
    fn heartbeat_due(&self, published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(at) = published_at else {
            return false;
        };

        now.signed_duration_since(at)
            .to_std()
            .map_or(false, |elapsed| elapsed >= self.heartbeat_interval)
    }
}
