//! Transport adapter: the contract the engine talks to, plus the rumqttc
//! implementation used in production.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::topics::MqttTopic;

/// Requests the rumqttc client may queue before `publish` starts waiting.
const REQUESTS_CAP: usize = 20;

/// Buffered transport events before the pump applies backpressure.
const EVENTS_CAP: usize = 64;

/// Events pushed by the transport, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectionLost(String),
    Message { topic: String, payload: Vec<u8> },
    /// Broker acknowledged a QoS>0 publish. Advisory only.
    DeliveryComplete(u16),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), LinkError>;

    async fn subscribe(&self, topic: &MqttTopic) -> Result<(), LinkError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError>;

    /// Fire-and-forget publish, never retained.
    async fn publish(&self, topic: &MqttTopic, payload: &str) -> Result<(), LinkError>;

    /// Best-effort; failures are only logged.
    async fn disconnect(&self);
}

/// Unique client identity: `<prefix>-<8 hex digits>`.
pub fn client_id(prefix: &str) -> String {
    format!("{prefix}-{:08x}", fastrand::u32(..))
}

// ---------------------------------------------------------------------------
// rumqttc implementation
// ---------------------------------------------------------------------------

/// Builds a fresh client/event loop pair on every `connect` and forwards
/// broker traffic as [`TransportEvent`]s until the session drops.
pub struct MqttTransport {
    options: MqttOptions,
    events: mpsc::Sender<TransportEvent>,
    client: RwLock<Option<AsyncClient>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new(options: MqttOptions) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, rx) = mpsc::channel(EVENTS_CAP);
        let transport = Self {
            options,
            events,
            client: RwLock::new(None),
            pump: Mutex::new(None),
        };
        (transport, rx)
    }

    async fn client(&self) -> Result<AsyncClient, LinkError> {
        self.client.read().await.clone().ok_or(LinkError::NotConnected)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), LinkError> {
        if let Some(old) = self.pump.lock().await.take() {
            old.abort();
        }
        *self.client.write().await = None;

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUESTS_CAP);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(
                        broker = ?self.options.broker_address(),
                        session_present = ack.session_present,
                        "mqtt connected"
                    );
                    break;
                }
                Ok(_) => {}
                Err(e) => return Err(LinkError::Connection(e.to_string())),
            }
        }

        *self.client.write().await = Some(client);
        let handle = tokio::spawn(pump(eventloop, self.events.clone()));
        *self.pump.lock().await = Some(handle);
        Ok(())
    }

    async fn subscribe(&self, topic: &MqttTopic) -> Result<(), LinkError> {
        let client = self.client().await.map_err(|e| LinkError::Subscription {
            topic: topic.name.clone(),
            reason: e.to_string(),
        })?;
        client
            .subscribe(topic.name.clone(), topic.qos)
            .await
            .map_err(|e| LinkError::Subscription {
                topic: topic.name.clone(),
                reason: e.to_string(),
            })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        let client = self.client().await.map_err(|e| LinkError::Subscription {
            topic: topic.to_string(),
            reason: e.to_string(),
        })?;
        client
            .unsubscribe(topic)
            .await
            .map_err(|e| LinkError::Subscription {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(&self, topic: &MqttTopic, payload: &str) -> Result<(), LinkError> {
        let client = self.client().await.map_err(|e| LinkError::Publish {
            topic: topic.name.clone(),
            reason: e.to_string(),
        })?;
        client
            .publish(topic.name.clone(), topic.qos, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| LinkError::Publish {
                topic: topic.name.clone(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&self) {
        let Some(client) = self.client.write().await.take() else {
            return;
        };
        if let Err(e) = client.disconnect().await {
            debug!("mqtt disconnect failed: {e}");
        }
    }
}

/// What the pump does with one event-loop result.
#[derive(Debug, PartialEq)]
enum PumpStep {
    Forward(TransportEvent),
    Skip,
    /// Our own DISCONNECT went out.
    Stop,
    Lost(String),
}

fn classify(event: Result<Event, ConnectionError>) -> PumpStep {
    match event {
        Ok(Event::Incoming(Packet::Publish(p))) => PumpStep::Forward(TransportEvent::Message {
            topic: p.topic,
            payload: p.payload.to_vec(),
        }),
        Ok(Event::Incoming(Packet::PubAck(ack))) => {
            PumpStep::Forward(TransportEvent::DeliveryComplete(ack.pkid))
        }
        Ok(Event::Incoming(Packet::PubComp(comp))) => {
            PumpStep::Forward(TransportEvent::DeliveryComplete(comp.pkid))
        }
        Ok(Event::Incoming(Packet::SubAck(ack))) => {
            for code in &ack.return_codes {
                if matches!(code, SubscribeReasonCode::Failure) {
                    warn!(pkid = ack.pkid, "broker rejected subscription");
                }
            }
            PumpStep::Skip
        }
        Ok(Event::Outgoing(Outgoing::Disconnect)) => PumpStep::Stop,
        Ok(_) => PumpStep::Skip,
        Err(e) => PumpStep::Lost(e.to_string()),
    }
}

/// Drive the event loop for one session. Exits after reporting the first
/// connection error, or quietly once our own DISCONNECT has gone out.
async fn pump(mut eventloop: EventLoop, events: mpsc::Sender<TransportEvent>) {
    loop {
        let event = match classify(eventloop.poll().await) {
            PumpStep::Forward(event) => event,
            PumpStep::Skip => continue,
            PumpStep::Stop => {
                debug!("disconnect sent, stopping event pump");
                return;
            }
            PumpStep::Lost(cause) => {
                let _ = events.send(TransportEvent::ConnectionLost(cause)).await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            debug!("transport event receiver dropped, stopping event pump");
            return;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
