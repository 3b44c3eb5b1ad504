//! Managed MQTT connection.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnAck, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter,
    TlsConfiguration, Transport,
};
use tokio::sync::{mpsc, Mutex};
use url::Url;

use crate::config::{BrokerConfig, MutualTls};
use crate::events::{LinkEvent, LinkTracker};

/// Delay before the transport retries after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Errors from the broker link.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BrokerError {
    /// Invalid broker URL
    #[error("invalid broker URL: {0}")]
    InvalidUrl(String),
    /// TLS credentials missing or unreadable
    #[error("TLS configuration error: {0}")]
    Tls(String),
    /// Initial connection failed
    #[error("connection error: {0}")]
    Connect(String),
    /// A publish attempt failed
    #[error("publish error: {0}")]
    Publish(String),
    /// A subscribe request could not be issued
    #[error("subscription error: {0}")]
    Subscribe(String),
    /// A disconnect request could not be issued
    #[error("disconnect error: {0}")]
    Disconnect(String),
}

/// Handle to one managed MQTT connection.
///
/// Created by [`BrokerLink::connect`], which also hands back the channel
/// carrying the link's [`LinkEvent`] notifications.
pub struct BrokerLink {
    client: AsyncClient,
    tracker: Arc<Mutex<LinkTracker>>,
    closing: Arc<AtomicBool>,
}

impl BrokerLink {
    /// Connect to the broker.
    ///
    /// Blocks until the broker confirms the session or the connect
    /// timeout elapses; a successful return means the link is ready to
    /// publish. The transport then keeps running in its own task, which
    /// reconnects on its own after interruptions and reports lifecycle
    /// changes on the returned channel.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is invalid, the TLS credential set
    /// is missing or unreadable, or the broker cannot be reached.
    pub async fn connect(
        config: BrokerConfig,
    ) -> Result<(Self, mpsc::Receiver<LinkEvent>), BrokerError> {
        let (host, port, tls) = parse_broker_url(&config.broker_url)?;

        let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
        mqtt_options.set_keep_alive(config.keep_alive);
        mqtt_options.set_clean_session(config.clean_session);

        if tls {
            let Some(paths) = &config.tls else {
                return Err(BrokerError::Tls(format!(
                    "{}: TLS endpoint but no credential set configured",
                    config.broker_url
                )));
            };
            mqtt_options.set_transport(Transport::Tls(load_tls(paths)?));
        }

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 100);

        let ack = tokio::time::timeout(config.connect_timeout, await_connack(&mut eventloop))
            .await
            .map_err(|_| {
                BrokerError::Connect(format!(
                    "no CONNACK within {:?} from {}",
                    config.connect_timeout, config.broker_url
                ))
            })??;

        tracing::info!(
            broker = %config.broker_url,
            client_id = %config.client_id,
            session_present = ack.session_present,
            "Connected to MQTT broker"
        );

        let tracker = Arc::new(Mutex::new(LinkTracker::new()));
        let closing = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(100);

        tokio::spawn(drive_link(
            eventloop,
            client.clone(),
            Arc::clone(&tracker),
            Arc::clone(&closing),
            tx,
        ));

        Ok((
            Self {
                client,
                tracker,
                closing,
            },
            rx,
        ))
    }

    /// Queue a payload for publishing at least once.
    ///
    /// The request is handed to the transport task without waiting. A
    /// backlogged transport, as during an extended broker outage, fails
    /// the publish instead of blocking the caller.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Publish`] when the transport's request
    /// queue is full or closed.
    pub fn publish(&self, topic: &str, payload: &[u8], retain: bool) -> Result<(), BrokerError> {
        tracing::debug!(topic, payload_len = payload.len(), retain, "Publishing");

        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload)
            .map_err(|e| BrokerError::Publish(e.to_string()))
    }

    /// Subscribe to a topic and track it for reissue after session loss.
    ///
    /// The grant arrives later as a [`LinkEvent::SubscriptionResult`] on
    /// the event channel.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Subscribe`] when the request cannot be
    /// queued for the transport.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), BrokerError> {
        tracing::info!(topic, ?qos, "Subscribing");

        // Track first so an acknowledgment can never race the request.
        self.tracker.lock().await.track(topic.to_string(), qos);

        if let Err(err) = self.client.try_subscribe(topic, qos) {
            self.tracker.lock().await.untrack(topic);
            return Err(BrokerError::Subscribe(err.to_string()));
        }
        Ok(())
    }

    /// Start a graceful disconnect.
    ///
    /// Completion is observed as [`LinkEvent::Closed`] on the event
    /// channel.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Disconnect`] when the transport's request
    /// queue is full or closed.
    pub fn disconnect(&self) -> Result<(), BrokerError> {
        self.closing.store(true, Ordering::SeqCst);
        self.client
            .try_disconnect()
            .map_err(|e| BrokerError::Disconnect(e.to_string()))
    }
}

/// Drive the event loop by hand until the broker confirms the session.
async fn await_connack(eventloop: &mut EventLoop) -> Result<ConnAck, BrokerError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack),
            Ok(_) => {}
            Err(err) => return Err(BrokerError::Connect(err.to_string())),
        }
    }
}

/// Transport task: polls the event loop for the life of the link.
///
/// Interruptions are survived here (the next poll reconnects); the owner
/// only hears about them through the event channel.
async fn drive_link(
    mut eventloop: EventLoop,
    client: AsyncClient,
    tracker: Arc<Mutex<LinkTracker>>,
    closing: Arc<AtomicBool>,
    events: mpsc::Sender<LinkEvent>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                tracing::info!(
                    session_present = ack.session_present,
                    "MQTT session resumed"
                );

                let reissue = tracker.lock().await.on_resumed(ack.session_present);

                if events
                    .send(LinkEvent::Resumed {
                        session_present: ack.session_present,
                    })
                    .await
                    .is_err()
                {
                    break;
                }

                if let Some(filters) = reissue {
                    tracing::info!(
                        count = filters.len(),
                        "Broker lost session state, reissuing subscriptions"
                    );
                    let filters: Vec<SubscribeFilter> = filters
                        .into_iter()
                        .map(|(path, qos)| SubscribeFilter::new(path, qos))
                        .collect();
                    // This task drains the request queue; awaiting
                    // capacity here would deadlock.
                    if let Err(err) = client.try_subscribe_many(filters) {
                        tracing::error!(error = %err, "Resubscribe request failed");
                        tracker.lock().await.abandon_resumed_request();
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                let event = tracker.lock().await.on_suback(&ack.return_codes);
                match event {
                    Some(event) => {
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        tracing::warn!(pkid = ack.pkid, "SubAck without a pending subscribe");
                    }
                }
            }
            Ok(_) => {}
            Err(err) => {
                if closing.load(Ordering::SeqCst) {
                    tracing::info!("MQTT connection closed");
                    let _ = events.send(LinkEvent::Closed).await;
                    break;
                }

                tracing::warn!(error = %err, "MQTT connection lost, reconnecting");
                if events
                    .send(LinkEvent::Interrupted {
                        error: err.to_string(),
                    })
                    .await
                    .is_err()
                {
                    break;
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }

    tracing::debug!("Transport task stopped");
}

/// Load the mutual-TLS credential set from disk.
fn load_tls(paths: &MutualTls) -> Result<TlsConfiguration, BrokerError> {
    let ca = fs::read(&paths.ca_file)
        .map_err(|e| BrokerError::Tls(format!("{}: {e}", paths.ca_file.display())))?;
    let cert = fs::read(&paths.cert_file)
        .map_err(|e| BrokerError::Tls(format!("{}: {e}", paths.cert_file.display())))?;
    let key = fs::read(&paths.key_file)
        .map_err(|e| BrokerError::Tls(format!("{}: {e}", paths.key_file.display())))?;

    Ok(TlsConfiguration::Simple {
        ca,
        alpn: None,
        client_auth: Some((cert, key)),
    })
}

/// Parse a broker URL into host, port and whether the endpoint is TLS.
fn parse_broker_url(input: &str) -> Result<(String, u16, bool), BrokerError> {
    if input.contains("://") {
        let url =
            Url::parse(input).map_err(|e| BrokerError::InvalidUrl(format!("{input}: {e}")))?;

        let tls = match url.scheme() {
            "tcp" | "mqtt" => false,
            "ssl" | "mqtts" => true,
            scheme => {
                return Err(BrokerError::InvalidUrl(format!(
                    "{input}: unsupported scheme '{scheme}'"
                )));
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| BrokerError::InvalidUrl(format!("{input}: missing host")))?;
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        return Ok((host.to_string(), port, tls));
    }

    let mut parts = input.split(':');
    let host = parts
        .next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| BrokerError::InvalidUrl(format!("{input}: missing host")))?;
    let port = match parts.next() {
        None => 1883,
        Some(port) => port
            .parse()
            .map_err(|_| BrokerError::InvalidUrl(format!("{input}: invalid port '{port}'")))?,
    };
    if parts.next().is_some() {
        return Err(BrokerError::InvalidUrl(format!(
            "{input}: too many ':' separators"
        )));
    }

    Ok((host.to_string(), port, false))
}
