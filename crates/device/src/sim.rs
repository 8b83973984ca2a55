//! Stateful plant-environment simulator for local development.
//!
//! Every channel is a random walk with mean reversion plus per-reading
//! noise. Watering pushes soil moisture up, after which it dries back toward
//! its centre.

// ---------------------------------------------------------------------------
// Gaussian approximation
// ---------------------------------------------------------------------------

/// Irwin-Hall: sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    (0..12).map(|_| fastrand::f64()).sum::<f64>() - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Light,
    Moisture,
    Humidity,
    Temperature,
    Pressure,
    Rain,
}

impl Channel {
    pub const ALL: [Channel; 6] = [
        Self::Light,
        Self::Moisture,
        Self::Humidity,
        Self::Temperature,
        Self::Pressure,
        Self::Rain,
    ];

    /// Topic suffix under the device root.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Moisture => "moisture",
            Self::Humidity => "humidity",
            Self::Temperature => "temperature",
            Self::Pressure => "pressure",
            Self::Rain => "rain",
        }
    }

    /// (centre, walk sigma, mean reversion, noise sigma, min, max)
    fn model(self) -> (f64, f64, f64, f64, f64, f64) {
        match self {
            Self::Light => (800.0, 60.0, 0.05, 15.0, 0.0, 20_000.0),
            Self::Moisture => (45.0, 0.6, 0.02, 0.3, 0.0, 100.0),
            Self::Humidity => (55.0, 1.0, 0.05, 0.5, 0.0, 100.0),
            Self::Temperature => (21.0, 0.2, 0.05, 0.1, -20.0, 50.0),
            Self::Pressure => (1013.0, 0.4, 0.05, 0.2, 950.0, 1060.0),
            Self::Rain => (0.0, 0.3, 0.2, 0.05, 0.0, 50.0),
        }
    }
}

struct Walk {
    base: f64,
    center: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    noise_sigma: f64,
    min: f64,
    max: f64,
}

impl Walk {
    fn new(channel: Channel) -> Self {
        let (center, walk_sigma, mean_reversion, noise_sigma, min, max) = channel.model();
        Self {
            base: gaussian(center, walk_sigma * 3.0).clamp(min, max),
            center,
            walk_sigma,
            mean_reversion,
            noise_sigma,
            min,
            max,
        }
    }

    fn step(&mut self) -> f64 {
        let pull = self.mean_reversion * (self.center - self.base);
        let walk = gaussian(0.0, self.walk_sigma);
        self.base = (self.base + pull + walk).clamp(self.min, self.max);
        gaussian(self.base, self.noise_sigma).clamp(self.min, self.max)
    }
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// Soil moisture added by one watering, in percent.
const WATER_BOOST: f64 = 30.0;

pub struct PlantSim {
    walks: Vec<(Channel, Walk)>,
}

impl Default for PlantSim {
    fn default() -> Self {
        Self::new()
    }
}

impl PlantSim {
    pub fn new() -> Self {
        Self {
            walks: Channel::ALL.iter().map(|&c| (c, Walk::new(c))).collect(),
        }
    }

    /// Advance every channel one tick and return the readings.
    pub fn sample(&mut self) -> Vec<(Channel, f64)> {
        self.walks
            .iter_mut()
            .map(|(channel, walk)| (*channel, walk.step()))
            .collect()
    }

    pub fn water(&mut self) {
        if let Some((_, walk)) = self.walks.iter_mut().find(|(c, _)| *c == Channel::Moisture) {
            walk.base = (walk.base + WATER_BOOST).min(walk.max);
        }
    }

    #[cfg(test)]
    fn base(&self, channel: Channel) -> f64 {
        self.walks
            .iter()
            .find(|(c, _)| *c == channel)
            .map(|(_, w)| w.base)
            .unwrap_or_default()
    }
}

/// Payload text for a reading.
pub fn format_reading(channel: Channel, value: f64) -> String {
    match channel {
        Channel::Light | Channel::Pressure => format!("{value:.0}"),
        _ => format!("{value:.1}"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
