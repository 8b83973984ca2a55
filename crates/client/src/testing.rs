//! Recording in-memory transport for engine tests.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::error::LinkError;
use crate::topics::MqttTopic;
use crate::transport::{Transport, TransportEvent};

#[derive(Default)]
struct Recorded {
    connected: bool,
    connect_attempts: usize,
    failing_connects: usize,
    failing_subscriptions: HashSet<String>,
    subscriptions: Vec<String>,
    unsubscriptions: Vec<String>,
    published: Vec<(String, String)>,
    disconnects: usize,
}

pub(crate) struct MockTransport {
    events: mpsc::Sender<TransportEvent>,
    recorded: Mutex<Recorded>,
}

impl MockTransport {
    pub(crate) fn new() -> (Arc<Self>, mpsc::Receiver<TransportEvent>) {
        let (events, rx) = mpsc::channel(64);
        let mock = Self {
            events,
            recorded: Mutex::new(Recorded::default()),
        };
        (Arc::new(mock), rx)
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        let mut recorded = self.recorded.lock().unwrap();
        f(&mut recorded)
    }

    pub(crate) fn fail_next_connects(&self, n: usize) {
        self.with(|r| r.failing_connects = n);
    }

    pub(crate) fn fail_subscription(&self, topic: &str) {
        self.with(|r| r.failing_subscriptions.insert(topic.to_string()));
    }

    pub(crate) fn connect_attempts(&self) -> usize {
        self.with(|r| r.connect_attempts)
    }

    pub(crate) fn subscriptions(&self) -> Vec<String> {
        self.with(|r| r.subscriptions.clone())
    }

    pub(crate) fn unsubscriptions(&self) -> Vec<String> {
        self.with(|r| r.unsubscriptions.clone())
    }

    pub(crate) fn disconnects(&self) -> usize {
        self.with(|r| r.disconnects)
    }

    /// Payloads published so far, in order.
    pub(crate) fn payloads(&self) -> Vec<String> {
        self.with(|r| r.published.iter().map(|(_, p)| p.clone()).collect())
    }

    pub(crate) fn published(&self) -> Vec<(String, String)> {
        self.with(|r| r.published.clone())
    }

    pub(crate) fn clear_published(&self) {
        self.with(|r| r.published.clear());
    }

    pub(crate) async fn deliver(&self, topic: &str, payload: &str) {
        self.events
            .send(TransportEvent::Message {
                topic: topic.to_string(),
                payload: payload.as_bytes().to_vec(),
            })
            .await
            .unwrap();
    }

    pub(crate) async fn drop_connection(&self, cause: &str) {
        self.with(|r| r.connected = false);
        self.events
            .send(TransportEvent::ConnectionLost(cause.to_string()))
            .await
            .unwrap();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), LinkError> {
        self.with(|r| {
            r.connect_attempts += 1;
            if r.failing_connects > 0 {
                r.failing_connects -= 1;
                return Err(LinkError::Connection("broker unreachable".into()));
            }
            r.connected = true;
            Ok(())
        })
    }

    async fn subscribe(&self, topic: &MqttTopic) -> Result<(), LinkError> {
        self.with(|r| {
            if r.failing_subscriptions.contains(&topic.name) {
                return Err(LinkError::Subscription {
                    topic: topic.name.clone(),
                    reason: "not authorized".into(),
                });
            }
            r.subscriptions.push(topic.name.clone());
            Ok(())
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.with(|r| r.unsubscriptions.push(topic.to_string()));
        Ok(())
    }

    async fn publish(&self, topic: &MqttTopic, payload: &str) -> Result<(), LinkError> {
        self.with(|r| {
            if !r.connected {
                return Err(LinkError::NotConnected);
            }
            r.published.push((topic.name.clone(), payload.to_string()));
            Ok(())
        })
    }

    async fn disconnect(&self) {
        self.with(|r| {
            r.connected = false;
            r.disconnects += 1;
        });
    }
}
