//! TOML config file loading and validation, plus environment overrides.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use time::UtcOffset;

use crate::engine::EngineOptions;
use crate::state::DEFAULT_HISTORY_LEN;
use crate::topics::{DeviceProfile, TopicRegistry};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerConfig,
    pub device: DeviceConfig,
    pub commands: CommandsConfig,
    pub reconnect: ReconnectConfig,
    pub display: DisplayConfig,
    pub web: WebConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub client_id_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.150".into(),
            port: 1883,
            keep_alive_secs: 30,
            client_id_prefix: "sproutlink".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Topic prefix the device publishes under.
    pub root: String,
    pub profile: DeviceProfile,
    pub history_len: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            root: "planter".into(),
            profile: DeviceProfile::Planter,
            history_len: DEFAULT_HISTORY_LEN,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub debounce_ms: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub utc_offset_minutes: i32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Display offsets stay within a day either side of UTC.
const MAX_OFFSET_MINUTES: u32 = 24 * 60;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing every
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // ── Broker ──────────────────────────────────────────
        if self.broker.host.trim().is_empty() {
            errors.push("broker.host is empty".into());
        }
        if self.broker.port == 0 {
            errors.push("broker.port must be non-zero".into());
        }
        if self.broker.keep_alive_secs == 0 {
            errors.push("broker.keep_alive_secs must be positive".into());
        }
        if self.broker.client_id_prefix.trim().is_empty() {
            errors.push("broker.client_id_prefix is empty".into());
        }

        // ── Device ──────────────────────────────────────────
        let root = self.device.root.trim_end_matches('/');
        if root.trim().is_empty() {
            errors.push("device.root is empty".into());
        } else if root.contains(['#', '+']) {
            errors.push(format!(
                "device.root '{}' must not contain MQTT wildcards",
                self.device.root
            ));
        }
        if self.device.history_len == 0 {
            errors.push("device.history_len must be positive".into());
        }

        // ── Timing ──────────────────────────────────────────
        if self.commands.debounce_ms == 0 {
            errors.push("commands.debounce_ms must be positive".into());
        }
        if self.reconnect.min_backoff_ms == 0 {
            errors.push("reconnect.min_backoff_ms must be positive".into());
        }
        if self.reconnect.min_backoff_ms > self.reconnect.max_backoff_ms {
            errors.push(format!(
                "reconnect.min_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.reconnect.min_backoff_ms, self.reconnect.max_backoff_ms
            ));
        }

        // ── Display ─────────────────────────────────────────
        if self.display.utc_offset_minutes.unsigned_abs() > MAX_OFFSET_MINUTES {
            errors.push(format!(
                "display.utc_offset_minutes {} out of range [-{MAX_OFFSET_MINUTES}, {MAX_OFFSET_MINUTES}]",
                self.display.utc_offset_minutes
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    /// Apply `MQTT_HOST`, `MQTT_PORT` and `WEB_PORT` from `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("MQTT_HOST") {
            self.broker.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.broker.port = port
                .parse()
                .with_context(|| format!("invalid MQTT_PORT '{port}'"))?;
        }
        if let Some(port) = lookup("WEB_PORT") {
            self.web.port = port
                .parse()
                .with_context(|| format!("invalid WEB_PORT '{port}'"))?;
        }
        Ok(())
    }

    pub fn engine_options(&self) -> Result<EngineOptions> {
        let offset_secs = self.display.utc_offset_minutes.saturating_mul(60);
        let display_offset = UtcOffset::from_whole_seconds(offset_secs).with_context(|| {
            format!(
                "invalid display.utc_offset_minutes {}",
                self.display.utc_offset_minutes
            )
        })?;

        Ok(EngineOptions {
            registry: TopicRegistry::new(&self.device.root, self.device.profile),
            history_len: self.device.history_len,
            debounce: Duration::from_millis(self.commands.debounce_ms),
            min_backoff: Duration::from_millis(self.reconnect.min_backoff_ms),
            max_backoff: Duration::from_millis(self.reconnect.max_backoff_ms),
            display_offset,
        })
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Like [`load`], but a missing file yields the defaults.
pub fn load_or_default(path: &str) -> Result<Config> {
    if Path::new(path).exists() {
        load(path)
    } else {
        tracing::info!(path, "no config file, using defaults");
        Ok(Config::default())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
