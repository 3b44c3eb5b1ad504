//! # glucolink Core
//!
//! Reading model and publish gating for glucolink.
//!
//! This crate provides:
//! - `Reading`: one glucose measurement, normalized to mg/dL with a UTC timestamp
//! - Unit conversion (mmol/L to mg/dL) and strict upstream timestamp parsing
//! - `PublishGate`: the change-threshold and heartbeat decision rule
//! - `PublishState`: what was last sent downstream, owned by the poll loop

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gate;
pub mod reading;

pub use gate::{PublishDecision, PublishGate, PublishState};
pub use reading::{mmol_to_mgdl, parse_upstream_time, Reading, ReadingError, MMOL_TO_MGDL};
