//! # Tidepool Adapter
//!
//! HTTP client and re-authenticating session for the Tidepool data
//! platform, the upstream source of continuous-glucose readings.
//!
//! The adapter covers the three calls the daemon needs:
//!
//! - `POST /auth/login` with a Basic credential, yielding the account
//!   user id and a short-lived session token (returned in the
//!   `X-Tidepool-Session-Token` response header)
//! - `GET /metadata/users/{userid}/users` listing the accounts linked
//!   to the authenticated account; the first entry is the subject whose
//!   readings are fetched
//! - `GET /data/{subject}?latest=true&type=cbg` returning the most
//!   recent CGM reading, reported in mmol/L and normalized to mg/dL at
//!   this boundary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod session;

pub use client::{AuthSession, Credential, TidepoolClient, TidepoolConfig, UpstreamError};
pub use session::UpstreamSession;
