use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

use crate::topics::Sensor;

/// Default bound on every sliding-window history.
pub const DEFAULT_HISTORY_LEN: usize = 20;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Latest known state of the device. Published as `Arc<DeviceState>` and
/// never mutated once published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    pub light_lux: String,
    pub temperature: String,
    pub pressure: String,
    /// Scalar moisture, only fed by profiles that do not window moisture.
    pub moisture: String,
    pub last_watered_at: String,
    pub light_level_percent: u8,
    pub light_override: bool,
    pub water_confirmed: bool,
    pub moisture_history: VecDeque<f32>,
    pub humidity_history: VecDeque<f32>,
    pub rain_history: VecDeque<f32>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            light_lux: "0".to_string(),
            temperature: "0".to_string(),
            pressure: "0".to_string(),
            moisture: "0".to_string(),
            last_watered_at: "0".to_string(),
            light_level_percent: 0,
            light_override: false,
            water_confirmed: false,
            moisture_history: VecDeque::new(),
            humidity_history: VecDeque::new(),
            rain_history: VecDeque::new(),
        }
    }
}

impl DeviceState {
    pub fn history(&self, sensor: Sensor) -> Option<&VecDeque<f32>> {
        match sensor {
            Sensor::Moisture => Some(&self.moisture_history),
            Sensor::Humidity => Some(&self.humidity_history),
            Sensor::Rain => Some(&self.rain_history),
            Sensor::Light | Sensor::Temperature | Sensor::Pressure => None,
        }
    }

    fn history_mut(&mut self, sensor: Sensor) -> Option<&mut VecDeque<f32>> {
        match sensor {
            Sensor::Moisture => Some(&mut self.moisture_history),
            Sensor::Humidity => Some(&mut self.humidity_history),
            Sensor::Rain => Some(&mut self.rain_history),
            Sensor::Light | Sensor::Temperature | Sensor::Pressure => None,
        }
    }

    fn scalar_mut(&mut self, sensor: Sensor) -> Option<&mut String> {
        match sensor {
            Sensor::Light => Some(&mut self.light_lux),
            Sensor::Temperature => Some(&mut self.temperature),
            Sensor::Pressure => Some(&mut self.pressure),
            Sensor::Moisture => Some(&mut self.moisture),
            Sensor::Humidity | Sensor::Rain => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Updates
// ---------------------------------------------------------------------------

/// A single field change proposed to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StateUpdate {
    Scalar(Sensor, String),
    Append(Sensor, f32),
    LightOverride(bool),
    LightLevel(u8),
    LastWatered(String),
    WaterConfirmed(bool),
}

/// Sending half of the store's input queue.
pub type StoreHandle = mpsc::UnboundedSender<StateUpdate>;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Sole writer of [`DeviceState`]. Every apply clones the current snapshot,
/// changes the copy, and broadcasts it; readers holding an older `Arc` keep
/// seeing the old data.
pub struct StateStore {
    current: Arc<DeviceState>,
    history_len: usize,
    tx: watch::Sender<Arc<DeviceState>>,
}

impl StateStore {
    pub fn new(history_len: usize) -> (Self, watch::Receiver<Arc<DeviceState>>) {
        let current = Arc::new(DeviceState::default());
        let (tx, rx) = watch::channel(Arc::clone(&current));
        let store = Self {
            current,
            history_len: history_len.max(1),
            tx,
        };
        (store, rx)
    }

    pub fn snapshot(&self) -> Arc<DeviceState> {
        Arc::clone(&self.current)
    }

    pub fn apply(&mut self, update: StateUpdate) -> Arc<DeviceState> {
        let mut next = (*self.current).clone();

        match update {
            StateUpdate::Scalar(sensor, text) => match next.scalar_mut(sensor) {
                Some(slot) => *slot = text,
                None => debug!(?sensor, "no scalar slot for sensor, dropping update"),
            },
            StateUpdate::Append(sensor, value) => match next.history_mut(sensor) {
                Some(history) => {
                    history.push_back(value);
                    if history.len() > self.history_len {
                        history.pop_front();
                    }
                }
                None => debug!(?sensor, "no history for sensor, dropping update"),
            },
            StateUpdate::LightOverride(on) => next.light_override = on,
            StateUpdate::LightLevel(percent) => next.light_level_percent = percent,
            StateUpdate::LastWatered(text) => next.last_watered_at = text,
            StateUpdate::WaterConfirmed(confirmed) => next.water_confirmed = confirmed,
        }

        if next == *self.current {
            return self.snapshot();
        }
        self.current = Arc::new(next);
        self.tx.send_replace(Arc::clone(&self.current));
        self.snapshot()
    }

    /// Drain the input queue until every sender is gone.
    pub async fn run(mut self, mut updates: mpsc::UnboundedReceiver<StateUpdate>) {
        while let Some(update) = updates.recv().await {
            trace!(?update, "applying state update");
            self.apply(update);
        }
        debug!("state store input closed");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
