//! # Broker Link
//!
//! One persistent, automatically-reconnecting MQTT connection with
//! mutual TLS, built on `rumqttc`.
//!
//! [`BrokerLink::connect`] blocks until the broker confirms the session,
//! so a successful return means "ready to publish". After that the
//! transport runs in its own task: unexpected disconnects trigger the
//! built-in reconnect, and lifecycle notifications reach the owner as
//! [`LinkEvent`]s on an mpsc channel rather than callbacks. Requests
//! never wait for the transport; when its queue is backlogged they fail
//! fast and the caller decides whether to retry.
//!
//! Transport reconnection is automatic, but the broker only preserves
//! subscription state when the previous session survived. When a resume
//! reports `session_present = false` the link reissues every tracked
//! subscription and reports the grants back as a
//! [`LinkEvent::SubscriptionResult`], so the owner can detect a silently
//! rejected subscription.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod events;
pub mod link;

pub use config::{BrokerConfig, MutualTls};
pub use events::{LinkEvent, SubscriptionGrant};
pub use link::{BrokerError, BrokerLink};
pub use rumqttc::QoS;
