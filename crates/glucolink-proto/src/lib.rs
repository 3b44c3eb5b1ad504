//! # glucolink Protocol
//!
//! Wire payload and MQTT topic layout for glucolink publishes.
//!
//! ## Payload
//!
//! One JSON object per reading:
//! `{"value": <integer mg/dL>, "timestamp": <RFC 3339 UTC string>}`
//!
//! ## Topic
//!
//! The latest reading goes to a single topic, `glucose/value`, published
//! with QoS at-least-once and (by default) the retained flag so that late
//! subscribers see the current value immediately.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod message;
pub mod topic;

pub use message::{format_timestamp, GlucoseMessage, PayloadError};
pub use topic::{validate_publish_topic, TopicError, GLUCOSE_TOPIC};
