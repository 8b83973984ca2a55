mod protocol;
mod sim;

use anyhow::Result;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use protocol::{parse_request, Device};
use sim::{format_reading, PlantSim};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let root = env::var("TOPIC_ROOT").unwrap_or_else(|_| "planter".to_string());
    let root = root.trim_end_matches('/').to_string();
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5)
        .max(1);

    let client_id = format!("sproutlink-device-{root}");
    let mut mqttoptions = MqttOptions::new(client_id, broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 20);

    let request_topic = format!("{root}/request");
    info!(%root, sample_every_s, "device simulator starting");

    let mut sim = PlantSim::new();
    let mut device = Device::default();
    let mut ticker = interval(Duration::from_secs(sample_every_s));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("device connected to mqtt");
                    if let Err(e) = client.try_subscribe(&request_topic, QoS::AtLeastOnce) {
                        warn!(topic = %request_topic, "subscribe failed: {e}");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) if p.topic == request_topic => {
                    let text = String::from_utf8_lossy(&p.payload);
                    let Some(request) = parse_request(&text) else {
                        warn!(payload = %text, "ignoring unknown request");
                        continue;
                    };
                    info!(?request, "request received");

                    if matches!(request, protocol::Request::Water) {
                        sim.water();
                    }
                    let now = OffsetDateTime::now_utc().unix_timestamp();
                    for reply in device.handle(request, now) {
                        let topic = format!("{root}/{}", reply.suffix);
                        if let Err(e) =
                            client.try_publish(&topic, QoS::AtLeastOnce, false, reply.payload)
                        {
                            warn!(%topic, "reply not sent: {e}");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            },
            _ = ticker.tick() => {
                for (channel, value) in sim.sample() {
                    let topic = format!("{root}/{}", channel.suffix());
                    let payload = format_reading(channel, value);
                    debug!(%topic, %payload, "telemetry");
                    if let Err(e) = client.try_publish(&topic, QoS::AtLeastOnce, false, payload) {
                        warn!(%topic, "telemetry not sent: {e}");
                    }
                }
            },
            _ = &mut shutdown => {
                info!("interrupt received, disconnecting");
                let _ = client.try_disconnect();
                break;
            }
        }
    }

    Ok(())
}
