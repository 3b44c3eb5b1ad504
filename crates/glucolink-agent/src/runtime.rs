//! Poll loop orchestration.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use glucolink_broker::{BrokerLink, LinkEvent};
use glucolink_core::{PublishGate, PublishState};
use glucolink_proto::{format_timestamp, validate_publish_topic, GlucoseMessage};
use glucolink_tidepool::{Credential, TidepoolClient, TidepoolConfig, UpstreamSession};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::AgentConfig;

/// Bound on waiting for the broker to confirm a graceful disconnect.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// The daemon runtime.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run the daemon until shutdown.
    ///
    /// Startup establishes the upstream session and the broker link;
    /// either failure is fatal, there is nothing useful to do without
    /// both. After that the loop polls once per period, and transient
    /// failures degrade to "try again next cycle".
    ///
    /// # Errors
    ///
    /// Returns an error when startup fails or when the broker rejects a
    /// resubscription after session loss.
    pub async fn run(self) -> Result<()> {
        validate_publish_topic(&self.config.publish.topic)
            .with_context(|| format!("Invalid publish topic '{}'", self.config.publish.topic))?;

        let client = TidepoolClient::new(TidepoolConfig {
            base_url: self.config.upstream.base_url.clone(),
            timeout: self.config.upstream.timeout,
        })
        .context("Failed to create upstream client")?;

        let credential = Credential::new(
            self.config.upstream.username.clone(),
            self.config.upstream.password.clone(),
        );

        let session = UpstreamSession::connect(client, credential)
            .await
            .context("Failed to establish upstream session")?;

        let (link, mut link_events) = BrokerLink::connect(self.config.broker.clone())
            .await
            .context("Failed to connect to MQTT broker")?;

        let gate = PublishGate {
            threshold_percent: self.config.poll.threshold_percent,
            heartbeat_interval: self.config.poll.heartbeat_interval,
        };
        let mut state = PublishState::default();

        let mut ticker = tokio::time::interval(self.config.poll.poll_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            subject_id = %session.subject_id(),
            topic = %self.config.publish.topic,
            poll_period = ?self.config.poll.poll_period,
            "Agent running, press Ctrl+C to stop"
        );

        // Main poll loop
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once(&session, &link, &gate, &mut state).await;
                }

                event = link_events.recv() => {
                    match event {
                        Some(event) => handle_link_event(&event)?,
                        None => anyhow::bail!("Broker link task stopped unexpectedly"),
                    }
                }

                // Handle shutdown
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        shutdown(&link, &mut link_events).await;

        tracing::info!("Agent stopped");
        Ok(())
    }

    /// One poll cycle: fetch, gate, publish.
    async fn poll_once(
        &self,
        session: &UpstreamSession,
        link: &BrokerLink,
        gate: &PublishGate,
        state: &mut PublishState,
    ) {
        let Some(reading) = session.latest_bg().await else {
            tracing::warn!("No reading this cycle");
            return;
        };

        tracing::info!(
            value_mgdl = reading.rounded_mgdl(),
            timestamp = %format_timestamp(reading.timestamp),
            "Fetched reading"
        );

        let now = Utc::now();
        let decision = gate.decide(state, &reading, now);
        if !decision.is_publish() {
            tracing::debug!(reason = ?decision, "Skipping publish");
            return;
        }

        let message = GlucoseMessage::from_reading(&reading);
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(error = %err, "Couldn't serialize reading");
                return;
            }
        };

        match link.publish(
            &self.config.publish.topic,
            payload.as_bytes(),
            self.config.publish.retain,
        ) {
            Ok(()) => {
                tracing::info!(
                    topic = %self.config.publish.topic,
                    payload = %payload,
                    reason = ?decision,
                    "Published reading"
                );
                state.record(reading, now);
            }
            Err(err) => {
                // State stays untouched so the next qualifying poll retries.
                tracing::warn!(
                    error = %err,
                    topic = %self.config.publish.topic,
                    "Publish failed"
                );
            }
        }
    }
}

/// React to a link notification. Only a rejected subscription grant is
/// fatal; everything else is logged and survived.
fn handle_link_event(event: &LinkEvent) -> Result<()> {
    match event {
        LinkEvent::Interrupted { error } => {
            tracing::warn!(error = %error, "Broker connection interrupted");
        }
        LinkEvent::Resumed { session_present } => {
            tracing::info!(
                session_present = *session_present,
                "Broker connection resumed"
            );
        }
        LinkEvent::SubscriptionResult { grants, resumed } => {
            for grant in grants {
                if grant.rejected() {
                    anyhow::bail!("Broker rejected subscription to '{}'", grant.topic);
                }
                tracing::info!(
                    topic = %grant.topic,
                    granted = ?grant.granted,
                    resumed = *resumed,
                    "Subscription granted"
                );
            }
        }
        LinkEvent::Closed => {
            tracing::info!("Broker connection closed");
        }
    }
    Ok(())
}

/// Graceful disconnect: ask the link to close, then wait for it to
/// confirm.
async fn shutdown(link: &BrokerLink, events: &mut mpsc::Receiver<LinkEvent>) {
    if let Err(err) = link.disconnect() {
        tracing::warn!(error = %err, "Disconnect request failed");
        return;
    }

    let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            if matches!(event, LinkEvent::Closed) {
                return true;
            }
        }
        false
    })
    .await;

    match closed {
        Ok(true) => tracing::info!("Broker disconnect acknowledged"),
        Ok(false) => tracing::warn!("Broker link task stopped before confirming disconnect"),
        Err(_) => tracing::warn!("Timed out waiting for broker disconnect"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glucolink_broker::{QoS, SubscriptionGrant};

    #[test]
    fn interruption_and_resume_are_survived() {
        assert!(handle_link_event(&LinkEvent::Interrupted {
            error: "connection reset".to_string(),
        })
        .is_ok());
        assert!(handle_link_event(&LinkEvent::Resumed {
            session_present: true,
        })
        .is_ok());
        assert!(handle_link_event(&LinkEvent::Closed).is_ok());
    }

    #[test]
    fn granted_subscription_is_survived() {
        let event = LinkEvent::SubscriptionResult {
            grants: vec![SubscriptionGrant {
                topic: "glucose/value".to_string(),
                granted: Some(QoS::AtLeastOnce),
            }],
            resumed: true,
        };
        assert!(handle_link_event(&event).is_ok());
    }

    #[test]
    fn rejected_subscription_is_fatal_and_names_the_topic() {
        let event = LinkEvent::SubscriptionResult {
            grants: vec![SubscriptionGrant {
                topic: "glucose/value".to_string(),
                granted: None,
            }],
            resumed: true,
        };

        let err = handle_link_event(&event).unwrap_err();
        assert!(err.to_string().contains("glucose/value"));
    }
}
