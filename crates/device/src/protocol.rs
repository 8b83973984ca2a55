//! Request handling for the simulated device: parses the single-letter
//! commands on `ROOT/request` and produces the replies the real firmware
//! sends back.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `D`
    WaterDate,
    /// `W`
    Water,
    /// `L`
    ToggleOverride,
    /// `V<n>`
    LightLevel(u8),
}

pub fn parse_request(payload: &str) -> Option<Request> {
    let payload = payload.trim();
    match payload {
        "D" => Some(Request::WaterDate),
        "W" => Some(Request::Water),
        "L" => Some(Request::ToggleOverride),
        _ => {
            let level: i64 = payload.strip_prefix('V')?.parse().ok()?;
            Some(Request::LightLevel(level.clamp(0, 100) as u8))
        }
    }
}

/// A reply, addressed relative to the device root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub suffix: &'static str,
    pub payload: String,
}

impl Reply {
    fn new(suffix: &'static str, payload: impl Into<String>) -> Self {
        Self {
            suffix,
            payload: payload.into(),
        }
    }
}

/// Actuator state kept by the device.
#[derive(Debug, Default)]
pub struct Device {
    pub light_override: bool,
    pub light_level: u8,
    /// Epoch seconds, 0 until the first watering.
    pub last_watered: i64,
}

impl Device {
    /// Apply `request` at wall-clock `now` (epoch seconds).
    pub fn handle(&mut self, request: Request, now: i64) -> Vec<Reply> {
        match request {
            Request::WaterDate => vec![self.date_reply()],
            Request::Water => {
                self.last_watered = now;
                vec![Reply::new("respond", "W ok"), self.date_reply()]
            }
            Request::ToggleOverride => {
                self.light_override = !self.light_override;
                let flag = if self.light_override { "1" } else { "0" };
                vec![Reply::new("respond/override", flag)]
            }
            Request::LightLevel(level) => {
                self.light_level = level.min(100);
                vec![Reply::new("respond/light", self.light_level.to_string())]
            }
        }
    }

    fn date_reply(&self) -> Reply {
        Reply::new("respond/date", self.last_watered.to_string())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
