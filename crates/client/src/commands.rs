//! Outbound command pipeline.
//!
//! Discrete intents (water, request date, toggle override) are published as
//! soon as they are dequeued. The light-level slider is coalesced: each new
//! value re-arms a quiescence deadline, and only the value still pending when
//! the deadline passes is published, unless it encodes to the same `V<n>`
//! command that was published last.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::state::{StateUpdate, StoreHandle};
use crate::topics::{
    light_level_command, MqttTopic, REQUEST_WATER_DATE, TOGGLE_LIGHT_OVERRIDE, WATER,
};
use crate::transport::Transport;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Intent {
    Water,
    RequestLastWaterDate,
    ToggleLightOverride,
    /// Raw slider position, expected in `0.0..=1.0`.
    SetLightLevel(f32),
}

pub type IntentSender = mpsc::UnboundedSender<Intent>;

pub struct CommandPipeline {
    transport: Arc<dyn Transport>,
    request: MqttTopic,
    debounce: Duration,
    store: StoreHandle,
    slider: watch::Sender<f32>,
    pending: Option<(f32, Instant)>,
    last_light_command: Option<String>,
}

impl CommandPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        request: MqttTopic,
        debounce: Duration,
        store: StoreHandle,
    ) -> (Self, watch::Receiver<f32>) {
        let (slider, slider_rx) = watch::channel(0.0);
        let pipeline = Self {
            transport,
            request,
            debounce,
            store,
            slider,
            pending: None,
            last_light_command: None,
        };
        (pipeline, slider_rx)
    }

    /// Process intents until every sender is dropped. A light level still
    /// pending at that point is discarded.
    pub async fn run(mut self, mut intents: mpsc::UnboundedReceiver<Intent>) {
        loop {
            let deadline = self.pending.map(|(_, at)| at);
            tokio::select! {
                intent = intents.recv() => match intent {
                    Some(intent) => self.handle(intent).await,
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.flush_light_level().await;
                }
            }
        }
        debug!("command pipeline input closed");
    }

    async fn handle(&mut self, intent: Intent) {
        match intent {
            Intent::Water => {
                let _ = self.store.send(StateUpdate::WaterConfirmed(false));
                self.publish(WATER).await;
                self.publish(REQUEST_WATER_DATE).await;
            }
            Intent::RequestLastWaterDate => {
                self.publish(REQUEST_WATER_DATE).await;
            }
            Intent::ToggleLightOverride => {
                self.publish(TOGGLE_LIGHT_OVERRIDE).await;
            }
            Intent::SetLightLevel(value) => self.set_light_level(value),
        }
    }

    fn set_light_level(&mut self, value: f32) {
        if !value.is_finite() {
            warn!(value, "ignoring non-finite light level");
            return;
        }
        let value = value.clamp(0.0, 1.0);
        self.slider.send_replace(value);
        self.pending = Some((value, Instant::now() + self.debounce));
    }

    async fn flush_light_level(&mut self) {
        let Some((value, _)) = self.pending.take() else {
            return;
        };
        let command = light_level_command(percent(value));
        if self.last_light_command.as_deref() == Some(command.as_str()) {
            debug!(%command, "light level unchanged, not publishing");
            return;
        }
        if self.publish(&command).await {
            self.last_light_command = Some(command);
        }
    }

    async fn publish(&self, payload: &str) -> bool {
        match self.transport.publish(&self.request, payload).await {
            Ok(()) => {
                info!(topic = %self.request.name, payload, "command published");
                true
            }
            Err(e) => {
                warn!(payload, "command not published: {e}");
                false
            }
        }
    }
}

/// Slider position to integer percent, ties rounded to even.
pub(crate) fn percent(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 100.0).round_ties_even() as u8
}

// ===========================================================================
// Tests
// ===========================================================================
