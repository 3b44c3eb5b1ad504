//! # glucolink agent
//!
//! Daemon that polls an upstream glucose telemetry API once a minute and
//! republishes readings over MQTT when they change enough to matter.
//!
//! ## Cycle
//!
//! 1. **Poll**: re-authenticate and fetch the latest CGM reading
//! 2. **Gate**: publish on the first reading, on a change beyond the
//!    configured threshold, or when the heartbeat interval elapses
//! 3. **Publish**: JSON payload to `glucose/value`, QoS at-least-once
//!
//! Upstream failures degrade to "try again next cycle"; only startup
//! failures and a rejected broker subscription terminate the process.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting glucolink agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    let agent = Agent::new(config);
    agent.run().await?;

    Ok(())
}
