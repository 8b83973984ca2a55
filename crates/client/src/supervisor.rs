//! Connection supervisor: the only component that drives the transport's
//! lifecycle.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Subscribing ──▶ Ready
//!      ▲               │                                          │
//!      └──[failure, backoff]                                      │
//!      └────────────────────────[connection lost]─────────────────┘
//! ```

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::commands::{Intent, IntentSender};
use crate::error::LinkError;
use crate::topics::MqttTopic;
use crate::transport::Transport;

pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Subscribing,
    Ready,
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Doubling delay between failed connect attempts, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Option<Duration>,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: None,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            None => self.min,
            Some(prev) => prev.saturating_mul(2).min(self.max),
        };
        self.current = Some(delay);
        delay
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

pub struct Supervisor {
    transport: Arc<dyn Transport>,
    subscriptions: Vec<MqttTopic>,
    bootstrap_topic: String,
    intents: IntentSender,
    state: watch::Sender<LinkState>,
    backoff: Backoff,
}

impl Supervisor {
    /// `bootstrap_topic` is the subscription whose success triggers the
    /// "request last water date" command on every entry into `Ready`.
    pub fn new(
        transport: Arc<dyn Transport>,
        subscriptions: Vec<MqttTopic>,
        bootstrap_topic: String,
        intents: IntentSender,
        backoff: Backoff,
    ) -> (Self, watch::Receiver<LinkState>) {
        let (state, state_rx) = watch::channel(LinkState::Disconnected);
        let supervisor = Self {
            transport,
            subscriptions,
            bootstrap_topic,
            intents,
            state,
            backoff,
        };
        (supervisor, state_rx)
    }

    fn set(&self, state: LinkState) {
        debug!(?state, "link state");
        self.state.send_replace(state);
    }

    /// Keep the link up until `shutdown` flips to true (or its sender is
    /// dropped). `lost` carries connection-lost notices from the inbound
    /// side.
    pub async fn run(
        mut self,
        mut lost: mpsc::UnboundedReceiver<LinkError>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            // Notices from a session that is already gone.
            while lost.try_recv().is_ok() {}

            self.set(LinkState::Connecting);
            let connected = tokio::select! {
                result = self.transport.connect() => result,
                _ = shutdown.changed() => break,
            };

            if let Err(e) = connected {
                self.set(LinkState::Disconnected);
                let delay = self.backoff.next_delay();
                warn!(retry_in_ms = delay.as_millis() as u64, "{e}");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => continue,
                    _ = shutdown.changed() => break,
                }
            }

            self.backoff.reset();
            self.set(LinkState::Connected);

            self.set(LinkState::Subscribing);
            let bootstrap = self.subscribe_all().await;

            self.set(LinkState::Ready);
            info!("link ready");
            if bootstrap {
                let _ = self.intents.send(Intent::RequestLastWaterDate);
            }

            tokio::select! {
                notice = lost.recv() => {
                    let Some(e) = notice else {
                        debug!("connection-lost channel closed");
                        break;
                    };
                    warn!("{e}, reconnecting");
                    self.set(LinkState::Disconnected);
                }
                _ = shutdown.changed() => {
                    self.unsubscribe_all().await;
                    break;
                }
            }
        }

        self.transport.disconnect().await;
        self.set(LinkState::Disconnected);
        info!("link supervisor stopped");
    }

    /// Subscribe every topic independently. Returns whether the bootstrap
    /// topic was among the successes.
    async fn subscribe_all(&self) -> bool {
        let mut bootstrap = false;
        for topic in &self.subscriptions {
            match self.transport.subscribe(topic).await {
                Ok(()) => {
                    debug!(topic = %topic.name, "subscribed");
                    if topic.name == self.bootstrap_topic {
                        bootstrap = true;
                    }
                }
                Err(e) => warn!("{e}"),
            }
        }
        bootstrap
    }

    async fn unsubscribe_all(&self) {
        for topic in &self.subscriptions {
            if let Err(e) = self.transport.unsubscribe(&topic.name).await {
                debug!("{e}");
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
