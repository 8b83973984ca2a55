//! Topic registry: logical signals, their wire topics and QoS, the request
//! command codes, and the per-device channel sets.

use rumqttc::QoS;
use serde::Deserialize;
use std::collections::HashMap;

/// QoS used for every subscription and publish.
pub const DEFAULT_QOS: QoS = QoS::AtLeastOnce;

// ---------------------------------------------------------------------------
// Command codes (payloads on the request topic)
// ---------------------------------------------------------------------------

pub const REQUEST_WATER_DATE: &str = "D";
pub const WATER: &str = "W";
pub const TOGGLE_LIGHT_OVERRIDE: &str = "L";
pub const LIGHT_LEVEL_PREFIX: &str = "V";

/// Build the `V<n>` light-level command for an integer percent.
pub fn light_level_command(percent: u8) -> String {
    format!("{LIGHT_LEVEL_PREFIX}{}", percent.min(100))
}

// ---------------------------------------------------------------------------
// Logical signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    Light,
    Moisture,
    Humidity,
    Temperature,
    Pressure,
    Rain,
}

impl Sensor {
    fn suffix(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Moisture => "moisture",
            Self::Humidity => "humidity",
            Self::Temperature => "temperature",
            Self::Pressure => "pressure",
            Self::Rain => "rain",
        }
    }
}

/// How a telemetry channel is kept in the device state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// Last value wins, kept as the raw text.
    Scalar,
    /// Parsed as a float and appended to a bounded history.
    Window,
}

/// Every addressable signal of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Sensor(Sensor),
    /// `ROOT/respond/override`
    Override,
    /// `ROOT/respond/light`
    LightLevel,
    /// `ROOT/respond/date`
    Date,
    /// Bare `ROOT/respond`, carries command acknowledgments.
    Ack,
    /// `ROOT/respond/#`, subscription only.
    RespondAll,
    /// `ROOT/request`, publish only.
    Request,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttTopic {
    pub name: String,
    pub qos: QoS,
}

impl MqttTopic {
    pub fn new(name: impl Into<String>, qos: QoS) -> Self {
        Self {
            name: name.into(),
            qos,
        }
    }
}

// ---------------------------------------------------------------------------
// Device profiles (channel sets)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    /// Full planter: six telemetry channels, soil/air/rain kept as histories.
    #[default]
    Planter,
    /// Light and moisture only, both scalar.
    Lite,
}

impl DeviceProfile {
    pub fn channels(self) -> &'static [(Sensor, Storage)] {
        match self {
            Self::Planter => &[
                (Sensor::Light, Storage::Scalar),
                (Sensor::Moisture, Storage::Window),
                (Sensor::Humidity, Storage::Window),
                (Sensor::Temperature, Storage::Scalar),
                (Sensor::Pressure, Storage::Scalar),
                (Sensor::Rain, Storage::Window),
            ],
            Self::Lite => &[
                (Sensor::Light, Storage::Scalar),
                (Sensor::Moisture, Storage::Scalar),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TopicRegistry {
    root: String,
    profile: DeviceProfile,
    routes: HashMap<String, Signal>,
}

impl TopicRegistry {
    pub fn new(root: &str, profile: DeviceProfile) -> Self {
        let root = root.trim_end_matches('/').to_string();
        let mut registry = Self {
            root,
            profile,
            routes: HashMap::new(),
        };

        let mut routed: Vec<Signal> = profile
            .channels()
            .iter()
            .map(|(sensor, _)| Signal::Sensor(*sensor))
            .collect();
        routed.extend([Signal::Override, Signal::LightLevel, Signal::Date, Signal::Ack]);

        for signal in routed {
            let topic = registry.topic(signal).name;
            registry.routes.insert(topic, signal);
        }
        registry
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn profile(&self) -> DeviceProfile {
        self.profile
    }

    /// Wire topic and QoS for a logical signal.
    pub fn topic(&self, signal: Signal) -> MqttTopic {
        let root = &self.root;
        let name = match signal {
            Signal::Sensor(sensor) => format!("{root}/{}", sensor.suffix()),
            Signal::Override => format!("{root}/respond/override"),
            Signal::LightLevel => format!("{root}/respond/light"),
            Signal::Date => format!("{root}/respond/date"),
            Signal::Ack => format!("{root}/respond"),
            Signal::RespondAll => format!("{root}/respond/#"),
            Signal::Request => format!("{root}/request"),
        };
        MqttTopic::new(name, DEFAULT_QOS)
    }

    /// Exact-match lookup of an inbound topic.
    pub fn signal(&self, topic: &str) -> Option<Signal> {
        self.routes.get(topic).copied()
    }

    /// Storage used for a sensor, `None` if the profile lacks the channel.
    pub fn storage(&self, sensor: Sensor) -> Option<Storage> {
        self.profile
            .channels()
            .iter()
            .find(|(s, _)| *s == sensor)
            .map(|(_, storage)| *storage)
    }

    /// Topics the supervisor subscribes to, telemetry first, `respond/#` last.
    pub fn subscriptions(&self) -> Vec<MqttTopic> {
        self.profile
            .channels()
            .iter()
            .map(|(sensor, _)| self.topic(Signal::Sensor(*sensor)))
            .chain(std::iter::once(self.topic(Signal::RespondAll)))
            .collect()
    }

    pub fn request_topic(&self) -> MqttTopic {
        self.topic(Signal::Request)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
