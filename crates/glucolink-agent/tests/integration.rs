use glucolink_broker::{BrokerConfig, BrokerLink};
use glucolink_core::Reading;
use glucolink_proto::{GlucoseMessage, GLUCOSE_TOPIC};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::timeout;
use uuid::Uuid;

fn parse_mqtt_url(url: &str) -> (String, u16) {
    let url = url
        .strip_prefix("tcp://")
        .or_else(|| url.strip_prefix("mqtt://"))
        .unwrap_or(url);

    let parts: Vec<&str> = url.split(':').collect();

    let host = parts.first().copied().unwrap_or("localhost").to_string();
    let port = parts.get(1).and_then(|p| p.parse().ok()).unwrap_or(1883);

    (host, port)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mqtt_reading_roundtrip() {
    if std::env::var("GLUCOLINK_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set GLUCOLINK_INTEGRATION=1 to run");
        return;
    }

    let broker = std::env::var("GLUCOLINK_MQTT_BROKER")
        .unwrap_or_else(|_| "tcp://localhost:1883".to_string());
    let (host, port) = parse_mqtt_url(&broker);

    let mut sub_opts = MqttOptions::new(format!("sub-{}", Uuid::new_v4()), host, port);
    sub_opts.set_keep_alive(Duration::from_secs(5));
    let (sub_client, mut sub_eventloop) = AsyncClient::new(sub_opts, 10);
    sub_client
        .subscribe(GLUCOSE_TOPIC, QoS::AtLeastOnce)
        .await
        .unwrap();

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        loop {
            match sub_eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let _ = tx.send(publish.payload.to_vec());
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;

    let config = BrokerConfig {
        broker_url: broker,
        client_id: format!("pub-{}", Uuid::new_v4()),
        keep_alive: Duration::from_secs(5),
        ..BrokerConfig::default()
    };
    let (link, _link_events) = BrokerLink::connect(config).await.unwrap();

    let reading = Reading::from_upstream(5.8, "2024-02-12T15:15:00Z").unwrap();
    let message = GlucoseMessage::from_reading(&reading);
    let payload = message.to_json().unwrap();

    link.publish(GLUCOSE_TOPIC, payload.as_bytes(), false)
        .unwrap();

    let received = timeout(Duration::from_secs(5), rx)
        .await
        .expect("timeout waiting for MQTT message")
        .expect("subscriber dropped");

    let decoded = GlucoseMessage::from_json(std::str::from_utf8(&received).unwrap()).unwrap();
    assert_eq!(decoded, message);
    assert_eq!(decoded.value, 104);

    link.disconnect().unwrap();
}
