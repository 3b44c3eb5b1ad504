//! Broker connection settings.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the broker link.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker URL (`tcp://`, `mqtt://`, `ssl://`, `mqtts://`, or plain `host:port`)
    pub broker_url: String,
    /// Client ID for the MQTT connection
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Start a clean session instead of resuming a previous one
    pub clean_session: bool,
    /// Bound on the initial connect
    pub connect_timeout: Duration,
    /// Mutual-TLS credential set, required for TLS URLs
    pub tls: Option<MutualTls>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_url: "tcp://localhost:1883".to_string(),
            client_id: "glucoseSource".to_string(),
            keep_alive: Duration::from_secs(20 * 60),
            clean_session: false,
            connect_timeout: Duration::from_secs(30),
            tls: None,
        }
    }
}

/// Filesystem locations of the mutual-TLS credential set.
#[derive(Debug, Clone)]
pub struct MutualTls {
    /// PEM trust anchor for the broker certificate
    pub ca_file: PathBuf,
    /// PEM client certificate presented to the broker
    pub cert_file: PathBuf,
    /// PEM private key matching the client certificate
    pub key_file: PathBuf,
}
