//! Agent configuration.

use anyhow::{Context, Result};
use glucolink_broker::{BrokerConfig, MutualTls};
use glucolink_core::gate::{DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_THRESHOLD_PERCENT};
use glucolink_proto::GLUCOSE_TOPIC;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Conventional credential file names inside the credential directory.
const DEFAULT_CA_FILE: &str = "root-CA.crt";
const DEFAULT_CERT_FILE: &str = "data_server.cert.pem";
const DEFAULT_KEY_FILE: &str = "data_server.private.key";

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upstream API settings
    pub upstream: UpstreamConfig,

    /// Broker link settings
    pub broker: BrokerConfig,

    /// Publish behavior
    pub publish: PublishConfig,

    /// Poll cadence and change-gate settings
    pub poll: PollConfig,
}

/// Upstream API settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the upstream API
    pub base_url: String,

    /// Account username
    pub username: String,

    /// Account password
    pub password: String,

    /// Request timeout
    pub timeout: Duration,
}

/// Publish behavior.
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Topic readings are published to
    pub topic: String,

    /// Set the retained flag on published readings
    pub retain: bool,
}

/// Poll cadence and change-gate settings.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Interval between polls
    pub poll_period: Duration,

    /// Change threshold, in percent of the last published value
    pub threshold_percent: f64,

    /// Forced-publish interval while values hold steady
    pub heartbeat_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            upstream: UpstreamConfig {
                base_url: "https://api.tidepool.org".to_string(),
                username: String::new(),
                password: String::new(),
                timeout: Duration::from_secs(30),
            },
            broker: BrokerConfig {
                broker_url: "mqtts://localhost:8883".to_string(),
                tls: Some(credential_paths(Path::new("."))),
                ..BrokerConfig::default()
            },
            publish: PublishConfig {
                topic: GLUCOSE_TOPIC.to_string(),
                retain: true,
            },
            poll: PollConfig {
                poll_period: Duration::from_secs(60),
                threshold_percent: DEFAULT_THRESHOLD_PERCENT,
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            },
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `GLUCOLINK_USERNAME` / `GLUCOLINK_PASSWORD`: upstream account (required)
    /// - `GLUCOLINK_UPSTREAM_URL`: upstream API base URL
    /// - `GLUCOLINK_UPSTREAM_TIMEOUT_SECS`: upstream request timeout
    /// - `GLUCOLINK_MQTT_BROKER`: broker URL (e.g. `mqtts://host:8883`)
    /// - `GLUCOLINK_CLIENT_ID`: MQTT client id
    /// - `GLUCOLINK_KEEPALIVE_SECS` / `GLUCOLINK_CLEAN_SESSION` /
    ///   `GLUCOLINK_CONNECT_TIMEOUT_SECS`: MQTT session tuning
    /// - `GLUCOLINK_CREDENTIAL_DIR`: directory holding the TLS credential
    ///   set; `GLUCOLINK_CA_FILE`, `GLUCOLINK_CERT_FILE` and
    ///   `GLUCOLINK_KEY_FILE` override individual paths
    /// - `GLUCOLINK_TOPIC` / `GLUCOLINK_RETAIN`: publish behavior
    /// - `GLUCOLINK_POLL_PERIOD_SECS` / `GLUCOLINK_THRESHOLD_PERCENT` /
    ///   `GLUCOLINK_HEARTBEAT_SECS`: cadence and gate tuning
    ///
    /// # Errors
    ///
    /// Returns an error when the account credentials are missing or a
    /// variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("GLUCOLINK_UPSTREAM_URL") {
            config.upstream.base_url = url;
        }

        if let Ok(username) = std::env::var("GLUCOLINK_USERNAME") {
            config.upstream.username = username;
        }

        if let Ok(password) = std::env::var("GLUCOLINK_PASSWORD") {
            config.upstream.password = password;
        }

        config.upstream.timeout =
            env_duration_secs("GLUCOLINK_UPSTREAM_TIMEOUT_SECS", config.upstream.timeout)?;

        if let Ok(url) = std::env::var("GLUCOLINK_MQTT_BROKER") {
            config.broker.broker_url = url;
        }

        if let Ok(client_id) = std::env::var("GLUCOLINK_CLIENT_ID") {
            config.broker.client_id = client_id;
        }

        config.broker.keep_alive =
            env_duration_secs("GLUCOLINK_KEEPALIVE_SECS", config.broker.keep_alive)?;
        config.broker.clean_session =
            env_bool("GLUCOLINK_CLEAN_SESSION", config.broker.clean_session)?;
        config.broker.connect_timeout =
            env_duration_secs("GLUCOLINK_CONNECT_TIMEOUT_SECS", config.broker.connect_timeout)?;

        let mut tls = match std::env::var("GLUCOLINK_CREDENTIAL_DIR") {
            Ok(dir) => credential_paths(Path::new(&dir)),
            Err(_) => credential_paths(Path::new(".")),
        };
        if let Ok(path) = std::env::var("GLUCOLINK_CA_FILE") {
            tls.ca_file = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GLUCOLINK_CERT_FILE") {
            tls.cert_file = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GLUCOLINK_KEY_FILE") {
            tls.key_file = PathBuf::from(path);
        }
        config.broker.tls = Some(tls);

        if let Ok(topic) = std::env::var("GLUCOLINK_TOPIC") {
            config.publish.topic = topic;
        }
        config.publish.retain = env_bool("GLUCOLINK_RETAIN", config.publish.retain)?;

        config.poll.poll_period =
            env_duration_secs("GLUCOLINK_POLL_PERIOD_SECS", config.poll.poll_period)?;
        config.poll.heartbeat_interval =
            env_duration_secs("GLUCOLINK_HEARTBEAT_SECS", config.poll.heartbeat_interval)?;

        if let Ok(threshold) = std::env::var("GLUCOLINK_THRESHOLD_PERCENT") {
            config.poll.threshold_percent = threshold
                .parse()
                .with_context(|| format!("Invalid GLUCOLINK_THRESHOLD_PERCENT: '{threshold}'"))?;
        }

        if config.upstream.username.is_empty() {
            anyhow::bail!("GLUCOLINK_USERNAME is not set");
        }
        if config.upstream.password.is_empty() {
            anyhow::bail!("GLUCOLINK_PASSWORD is not set");
        }

        Ok(config)
    }
}

/// Credential file paths under a directory, using the conventional names.
fn credential_paths(dir: &Path) -> MutualTls {
    MutualTls {
        ca_file: dir.join(DEFAULT_CA_FILE),
        cert_file: dir.join(DEFAULT_CERT_FILE),
        key_file: dir.join(DEFAULT_KEY_FILE),
    }
}

fn env_duration_secs(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("Invalid {name}: '{value}'"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value).with_context(|| format!("Invalid {name}: '{value}'")),
        Err(_) => Ok(default),
    }
}

/// Parse a boolean-ish setting.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_daemon_conventions() {
        let config = AgentConfig::default();
        assert_eq!(config.broker.client_id, "glucoseSource");
        assert_eq!(config.broker.keep_alive, Duration::from_secs(1200));
        assert!(!config.broker.clean_session);
        assert_eq!(config.publish.topic, "glucose/value");
        assert!(config.publish.retain);
        assert_eq!(config.poll.poll_period, Duration::from_secs(60));
        assert_eq!(config.poll.heartbeat_interval, Duration::from_secs(900));
        assert!((config.poll.threshold_percent - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn credential_paths_use_conventional_names() {
        let tls = credential_paths(Path::new("/etc/glucolink"));
        assert_eq!(tls.ca_file, PathBuf::from("/etc/glucolink/root-CA.crt"));
        assert_eq!(
            tls.cert_file,
            PathBuf::from("/etc/glucolink/data_server.cert.pem")
        );
        assert_eq!(
            tls.key_file,
            PathBuf::from("/etc/glucolink/data_server.private.key")
        );
    }

    #[test]
    fn bool_settings_accept_common_spellings() {
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
