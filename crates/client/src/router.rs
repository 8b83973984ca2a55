//! Inbound demultiplexing: `(topic, payload)` to a typed [`StateUpdate`].

use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::error::LinkError;
use crate::state::StateUpdate;
use crate::topics::{Signal, Storage, TopicRegistry, WATER};

pub struct Router {
    registry: TopicRegistry,
    display_offset: UtcOffset,
}

impl Router {
    pub fn new(registry: TopicRegistry, display_offset: UtcOffset) -> Self {
        Self {
            registry,
            display_offset,
        }
    }

    /// Decode one inbound message. `Ok(None)` means the message carries
    /// nothing for the state (unknown topic, ignored acknowledgment).
    pub fn route(&self, topic: &str, payload: &[u8]) -> Result<Option<StateUpdate>, LinkError> {
        let Some(signal) = self.registry.signal(topic) else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(payload);

        let update = match signal {
            Signal::Sensor(sensor) => match self.registry.storage(sensor) {
                Some(Storage::Scalar) => StateUpdate::Scalar(sensor, text.into_owned()),
                Some(Storage::Window) => {
                    let value = parse_reading(&text).map_err(|e| LinkError::malformed(topic, e))?;
                    StateUpdate::Append(sensor, value)
                }
                None => return Ok(None),
            },
            Signal::Override => StateUpdate::LightOverride(parse_override(&text)),
            Signal::LightLevel => {
                let level = parse_light_level(&text).map_err(|e| LinkError::malformed(topic, e))?;
                StateUpdate::LightLevel(level)
            }
            Signal::Date => {
                let secs: i64 = text
                    .trim()
                    .parse()
                    .map_err(|e| LinkError::malformed(topic, format!("bad epoch '{text}': {e}")))?;
                let rendered = format_epoch_seconds(secs, self.display_offset)
                    .map_err(|e| LinkError::malformed(topic, e))?;
                StateUpdate::LastWatered(rendered)
            }
            Signal::Ack => match ack_code(&text) {
                Some(WATER) => StateUpdate::WaterConfirmed(true),
                _ => return Ok(None),
            },
            Signal::RespondAll | Signal::Request => return Ok(None),
        };

        Ok(Some(update))
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Parse a windowed sensor reading. Surrounding whitespace is tolerated;
/// NaN and infinities are rejected.
pub(crate) fn parse_reading(text: &str) -> Result<f32, String> {
    let value: f32 = text
        .trim()
        .parse()
        .map_err(|e| format!("bad reading '{text}': {e}"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(format!("non-finite reading '{text}'"))
    }
}

/// Exactly `"1"` means override on; anything else, padded forms included,
/// is off.
pub(crate) fn parse_override(text: &str) -> bool {
    text == "1"
}

/// Integer percent reported by the light actuator, clamped to 0..=100.
pub(crate) fn parse_light_level(text: &str) -> Result<u8, String> {
    let level: i64 = text
        .trim()
        .parse()
        .map_err(|e| format!("bad light level '{text}': {e}"))?;
    Ok(level.clamp(0, 100) as u8)
}

/// First whitespace-separated token of an acknowledgment.
pub(crate) fn ack_code(text: &str) -> Option<&str> {
    text.split_whitespace().next()
}

/// Render epoch seconds as `Www Mmm dd HH:MM:SS yyyy` in `offset`.
pub fn format_epoch_seconds(secs: i64, offset: UtcOffset) -> Result<String, String> {
    let shifted = secs
        .checked_add(i64::from(offset.whole_seconds()))
        .ok_or_else(|| format!("timestamp {secs} out of range"))?;
    let datetime = OffsetDateTime::from_unix_timestamp(shifted).map_err(|e| e.to_string())?;
    datetime
        .format(format_description!(
            "[weekday repr:short] [month repr:short] [day] [hour]:[minute]:[second] [year]"
        ))
        .map_err(|e| e.to_string())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topics::{DeviceProfile, Sensor};

    fn planter() -> Router {
        Router::new(
            TopicRegistry::new("planter", DeviceProfile::Planter),
            UtcOffset::UTC,
        )
    }

    fn lite() -> Router {
        Router::new(
            TopicRegistry::new("planter2.0", DeviceProfile::Lite),
            UtcOffset::UTC,
        )
    }

    // -- scalar channels ----------------------------------------------------

    #[test]
    fn scalar_payload_is_stored_verbatim() {
        assert_eq!(
            planter().route("planter/light", b"1234.5").unwrap(),
            Some(StateUpdate::Scalar(Sensor::Light, "1234.5".into()))
        );
        assert_eq!(
            planter().route("planter/pressure", b" 1013 hPa").unwrap(),
            Some(StateUpdate::Scalar(Sensor::Pressure, " 1013 hPa".into()))
        );
    }

    #[test]
    fn lite_moisture_is_scalar() {
        assert_eq!(
            lite().route("planter2.0/moisture", b"not-a-number").unwrap(),
            Some(StateUpdate::Scalar(Sensor::Moisture, "not-a-number".into()))
        );
    }

    // -- window channels ----------------------------------------------------

    #[test]
    fn window_payload_is_parsed_as_float() {
        assert_eq!(
            planter().route("planter/moisture", b"42.25").unwrap(),
            Some(StateUpdate::Append(Sensor::Moisture, 42.25))
        );
        assert_eq!(
            planter().route("planter/rain", b"7\n").unwrap(),
            Some(StateUpdate::Append(Sensor::Rain, 7.0))
        );
    }

    #[test]
    fn window_garbage_is_malformed() {
        let err = planter().route("planter/humidity", b"wet").unwrap_err();
        assert!(
            matches!(err, LinkError::MalformedPayload { ref topic, .. } if topic == "planter/humidity"),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn parse_reading_rejects_non_finite() {
        assert!(parse_reading("NaN").is_err());
        assert!(parse_reading("inf").is_err());
        assert!(parse_reading("").is_err());
        assert_eq!(parse_reading(" -3.5 "), Ok(-3.5));
    }

    // -- override -----------------------------------------------------------

    #[test]
    fn override_one_is_true() {
        assert_eq!(
            planter().route("planter/respond/override", b"1").unwrap(),
            Some(StateUpdate::LightOverride(true))
        );
    }

    #[test]
    fn override_anything_else_is_false() {
        for payload in [&b"0"[..], b"", b"true", b"11", b" 1", b"1\n"] {
            assert_eq!(
                planter().route("planter/respond/override", payload).unwrap(),
                Some(StateUpdate::LightOverride(false)),
                "payload {payload:?}"
            );
        }
    }

    // -- light level --------------------------------------------------------

    #[test]
    fn light_level_integer() {
        assert_eq!(
            planter().route("planter/respond/light", b"64").unwrap(),
            Some(StateUpdate::LightLevel(64))
        );
    }

    #[test]
    fn light_level_out_of_range_is_clamped() {
        assert_eq!(parse_light_level("250"), Ok(100));
        assert_eq!(parse_light_level("-4"), Ok(0));
    }

    #[test]
    fn light_level_decimal_is_malformed() {
        assert!(planter().route("planter/respond/light", b"6.5").is_err());
    }

    // -- date ---------------------------------------------------------------

    #[test]
    fn date_renders_without_timezone_field() {
        assert_eq!(
            planter().route("planter/respond/date", b"1693526400").unwrap(),
            Some(StateUpdate::LastWatered("Fri Sep 01 00:00:00 2023".into()))
        );
    }

    #[test]
    fn date_uses_display_offset() {
        let east = UtcOffset::from_hms(2, 0, 0).unwrap();
        let west = UtcOffset::from_hms(-5, 0, 0).unwrap();
        assert_eq!(
            format_epoch_seconds(1_693_526_400, east).unwrap(),
            "Fri Sep 01 02:00:00 2023"
        );
        assert_eq!(
            format_epoch_seconds(1_693_526_400, west).unwrap(),
            "Thu Aug 31 19:00:00 2023"
        );
    }

    #[test]
    fn date_has_five_space_separated_tokens() {
        let rendered = format_epoch_seconds(0, UtcOffset::UTC).unwrap();
        assert_eq!(rendered, "Thu Jan 01 00:00:00 1970");
        assert_eq!(rendered.split(' ').count(), 5);
    }

    #[test]
    fn date_garbage_is_malformed() {
        assert!(planter().route("planter/respond/date", b"yesterday").is_err());
        assert!(planter()
            .route("planter/respond/date", i64::MAX.to_string().as_bytes())
            .is_err());
    }

    // -- acknowledgments ----------------------------------------------------

    #[test]
    fn water_ack_confirms() {
        assert_eq!(
            planter().route("planter/respond", b"W ok 12").unwrap(),
            Some(StateUpdate::WaterConfirmed(true))
        );
        assert_eq!(
            planter().route("planter/respond", b"W").unwrap(),
            Some(StateUpdate::WaterConfirmed(true))
        );
    }

    #[test]
    fn other_acks_are_ignored() {
        assert_eq!(planter().route("planter/respond", b"L 1").unwrap(), None);
        assert_eq!(planter().route("planter/respond", b"").unwrap(), None);
        assert_eq!(planter().route("planter/respond", b"WATER").unwrap(), None);
    }

    // -- unmatched ----------------------------------------------------------

    #[test]
    fn unknown_topics_are_noops() {
        assert_eq!(planter().route("planter/unknown", b"1").unwrap(), None);
        assert_eq!(planter().route("planter/request", b"W").unwrap(), None);
        assert_eq!(lite().route("planter2.0/rain", b"abc").unwrap(), None);
    }
}
