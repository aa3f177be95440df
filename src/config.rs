//! Controller configuration.
//!
//! Loaded once at startup from JSON and read-only afterwards. Names,
//! addresses and hosts use `heapless::String` so the sizes stay bounded;
//! everything else is plain serde.
//!
//! # Example
//!
//! ```rust
//! use rs_trainz_ble::config::{Config, ControllerConfig, HubConfig, LocoConfig, MqttConfig};
//! use rs_trainz_ble::channel::ChannelConfig;
//! use rs_trainz_ble::hub::HubKind;
//!
//! let config = Config::default()
//!     .with_mqtt(MqttConfig::default().with_host("192.168.1.100"))
//!     .with_controller(ControllerConfig::default().with_cycle_delay_ms(1000))
//!     .with_loco(
//!         LocoConfig::new(3, "BR 218").with_hub(
//!             HubConfig::new("00:07:80:d0:47:43", HubKind::SBrick)
//!                 .with_channel(ChannelConfig::motor(0))
//!                 .with_channel(ChannelConfig::light(1)),
//!         ),
//!     );
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashSet;
use std::path::Path;

use heapless::String as HString;
use serde::{Deserialize, Serialize};

use crate::channel::ChannelConfig;
use crate::error::ConfigError;
use crate::events::{ChannelRef, Event};
use crate::hub::HubKind;

/// Maximum length for short config strings (hostnames, addresses, names)
pub const MAX_SHORT_STRING: usize = 64;

/// Maximum length for longer config strings (topics)
pub const MAX_LONG_STRING: usize = 128;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Type alias for longer config strings
pub type LongString = HString<MAX_LONG_STRING>;

// ============================================================================
// Helper for creating heapless strings
// ============================================================================

fn utf8_prefix(s: &str, max: usize) -> &str {
    let take = s.len().min(max);
    let valid_end = s
        .char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= take)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &s[..valid_end]
}

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    let _ = hs.push_str(utf8_prefix(s, MAX_SHORT_STRING));
    hs
}

/// Create a LongString from a &str, truncating if too long
pub fn long_string(s: &str) -> LongString {
    let mut hs = LongString::new();
    let _ = hs.push_str(utf8_prefix(s, MAX_LONG_STRING));
    hs
}

fn enabled_by_default() -> bool {
    true
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete application configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Command bus configuration
    #[serde(default)]
    pub mqtt: MqttConfig,
    /// Control loop timing and policy
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Locomotives to control
    #[serde(default)]
    pub locos: Vec<LocoConfig>,
}

impl Config {
    /// Parse a configuration from JSON. The result is not validated.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set MQTT configuration
    pub fn with_mqtt(mut self, mqtt: MqttConfig) -> Self {
        self.mqtt = mqtt;
        self
    }

    /// Set controller configuration
    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }

    /// Add a locomotive
    pub fn with_loco(mut self, loco: LocoConfig) -> Self {
        self.locos.push(loco);
        self
    }

    /// Check cross references the type system cannot express.
    ///
    /// Disabled locomotives and hubs are validated too, so enabling one
    /// later never turns a loadable file into a broken one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.queue_length == 0 {
            return Err(ConfigError::ZeroQueueLength);
        }

        let mut seen = HashSet::new();
        for loco in &self.locos {
            if !seen.insert(loco.address) {
                return Err(ConfigError::DuplicateLoco(loco.address));
            }
            loco.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// MQTT Config
// ============================================================================

/// MQTT client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker hostname or IP
    pub host: ShortString,
    /// Broker port
    pub port: u16,
    /// Client ID (should be unique per controller)
    pub client_id: ShortString,
    /// Topic prefix (e.g., "trains" -> "trains/command")
    pub topic_prefix: ShortString,
    /// Username for authentication (empty = no auth)
    pub username: ShortString,
    /// Password for authentication
    pub password: ShortString,
    /// Keep-alive interval in seconds
    pub keep_alive_secs: u16,
    /// Whether MQTT is enabled
    pub enabled: bool,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: short_string("localhost"),
            port: 1883,
            client_id: short_string("rs-trainz-ble"),
            topic_prefix: short_string("trains"),
            username: ShortString::new(),
            password: ShortString::new(),
            keep_alive_secs: 30,
            enabled: true,
        }
    }
}

impl MqttConfig {
    /// Set the broker host
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = short_string(host);
        self
    }

    /// Set the broker port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the client ID
    pub fn with_client_id(mut self, id: &str) -> Self {
        self.client_id = short_string(id);
        self
    }

    /// Set the topic prefix
    pub fn with_topic_prefix(mut self, prefix: &str) -> Self {
        self.topic_prefix = short_string(prefix);
        self
    }

    /// Set authentication credentials
    pub fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.username = short_string(username);
        self.password = short_string(password);
        self
    }

    /// Enable or disable MQTT
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Build a topic string with the configured prefix
    pub fn topic(&self, suffix: &str) -> LongString {
        let mut topic = LongString::new();
        let _ = topic.push_str(self.topic_prefix.as_str());
        let _ = topic.push('/');
        let _ = topic.push_str(suffix);
        topic
    }

    /// Topic the controller takes commands from
    pub fn command_topic(&self) -> LongString {
        self.topic("command")
    }

    /// Check if authentication is configured
    pub fn has_auth(&self) -> bool {
        !self.username.is_empty()
    }
}

// ============================================================================
// Controller Config
// ============================================================================

/// Ramp tick configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// Tick period in milliseconds; also the watchdog keep-alive period
    pub tick_ms: u32,
    /// Speed units added per tick while accelerating
    pub accel_step: i16,
    /// Speed units removed per tick while slowing down
    pub brake_step: i16,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            accel_step: 10,
            brake_step: 20,
        }
    }
}

impl RampConfig {
    /// Set the tick period
    pub fn with_tick_ms(mut self, ms: u32) -> Self {
        self.tick_ms = ms.max(1);
        self
    }

    /// Set the acceleration and braking steps
    pub fn with_steps(mut self, accel_step: i16, brake_step: i16) -> Self {
        self.accel_step = accel_step.max(1);
        self.brake_step = brake_step.max(1);
        self
    }
}

/// Control loop configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Duration of one discovery scan
    pub scan_duration_ms: u32,
    /// Delay between control loop cycles
    pub cycle_delay_ms: u32,
    /// Slice of the cycle delay after which queued commands are drained
    pub command_poll_ms: u32,
    /// Hub watchdog timeout in tenths of a second (0 disables)
    pub watchdog_timeout: u8,
    /// Delay between the light toggles of the connect handshake
    pub handshake_blink_ms: u32,
    /// Capacity of the command ingress queue
    pub queue_length: usize,
    /// Brake the remaining hubs of a locomotive when one hub drops
    pub brake_on_disconnect: bool,
    /// Spawn a ramp worker thread per connected hub
    pub background_ramp: bool,
    /// Ramp tick settings
    pub ramp: RampConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            scan_duration_ms: 3000,
            cycle_delay_ms: 3000,
            command_poll_ms: 50,
            watchdog_timeout: 5,
            handshake_blink_ms: 250,
            queue_length: 32,
            brake_on_disconnect: true,
            background_ramp: true,
            ramp: RampConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Set the scan duration
    pub fn with_scan_duration_ms(mut self, ms: u32) -> Self {
        self.scan_duration_ms = ms;
        self
    }

    /// Set the delay between cycles
    pub fn with_cycle_delay_ms(mut self, ms: u32) -> Self {
        self.cycle_delay_ms = ms;
        self
    }

    /// Set the command poll slice
    pub fn with_command_poll_ms(mut self, ms: u32) -> Self {
        self.command_poll_ms = ms.max(1);
        self
    }

    /// Set the hub watchdog timeout in tenths of a second
    pub fn with_watchdog_timeout(mut self, tenths: u8) -> Self {
        self.watchdog_timeout = tenths;
        self
    }

    /// Set the handshake blink delay
    pub fn with_handshake_blink_ms(mut self, ms: u32) -> Self {
        self.handshake_blink_ms = ms;
        self
    }

    /// Set the ingress queue capacity
    pub fn with_queue_length(mut self, len: usize) -> Self {
        self.queue_length = len;
        self
    }

    /// Set the link-loss brake policy
    pub fn with_brake_on_disconnect(mut self, brake: bool) -> Self {
        self.brake_on_disconnect = brake;
        self
    }

    /// Enable or disable per-hub ramp threads
    pub fn with_background_ramp(mut self, enabled: bool) -> Self {
        self.background_ramp = enabled;
        self
    }

    /// Set the ramp configuration
    pub fn with_ramp(mut self, ramp: RampConfig) -> Self {
        self.ramp = ramp;
        self
    }
}

// ============================================================================
// Locomotive Config
// ============================================================================

/// One BLE hub inside a locomotive
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Advertised BLE address
    pub address: ShortString,
    /// Hub type
    pub kind: HubKind,
    /// Whether the controller manages this hub
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Channel layout
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl HubConfig {
    /// A hub with no channels
    pub fn new(address: &str, kind: HubKind) -> Self {
        Self {
            address: short_string(address),
            kind,
            enabled: true,
            channels: Vec::new(),
        }
    }

    /// Add a channel
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channels.push(channel);
        self
    }

    /// Enable or disable the hub
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let count = self.kind.protocol().channel_count();
        match self.channels.iter().find(|c| c.channel >= count) {
            Some(bad) => Err(ConfigError::InvalidChannel {
                hub: self.address.to_string(),
                channel: bad.channel,
            }),
            None => Ok(()),
        }
    }
}

/// One locomotive
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocoConfig {
    /// Locomotive address used by bus commands
    pub address: u32,
    /// Human-readable name
    #[serde(default)]
    pub name: ShortString,
    /// Whether the controller manages this locomotive
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Hubs built into the locomotive
    pub hubs: Vec<HubConfig>,
    /// Trigger table
    #[serde(default)]
    pub events: Vec<Event>,
}

impl LocoConfig {
    /// A locomotive with no hubs or events
    pub fn new(address: u32, name: &str) -> Self {
        Self {
            address,
            name: short_string(name),
            enabled: true,
            hubs: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Add a hub
    pub fn with_hub(mut self, hub: HubConfig) -> Self {
        self.hubs.push(hub);
        self
    }

    /// Add an event
    pub fn with_event(mut self, event: Event) -> Self {
        self.events.push(event);
        self
    }

    /// Enable or disable the locomotive
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hubs.is_empty() {
            return Err(ConfigError::NoHubs { loco: self.address });
        }

        for hub in &self.hubs {
            hub.validate()?;
        }

        let actions = self.events.iter().flat_map(|e| e.actions.iter());
        for action in actions {
            if let ChannelRef::Hub { hub, .. } = &action.channel {
                let known = self
                    .hubs
                    .iter()
                    .any(|h| h.address.eq_ignore_ascii_case(hub));
                if !known {
                    return Err(ConfigError::UnknownActionHub {
                        loco: self.address,
                        hub: hub.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Action, Trigger, TriggerSource};

    fn sbrick(address: &str) -> HubConfig {
        HubConfig::new(address, HubKind::SBrick).with_channel(ChannelConfig::motor(0))
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.controller.watchdog_timeout, 5);
        assert_eq!(config.controller.handshake_blink_ms, 250);
        assert!(config.controller.brake_on_disconnect);
        assert!(config.locos.is_empty());
    }

    #[test]
    fn mqtt_command_topic() {
        assert_eq!(MqttConfig::default().command_topic().as_str(), "trains/command");
        let mqtt = MqttConfig::default().with_topic_prefix("layout/north");
        assert_eq!(mqtt.command_topic().as_str(), "layout/north/command");
    }

    #[test]
    fn mqtt_auth_detection() {
        assert!(!MqttConfig::default().has_auth());
        assert!(MqttConfig::default().with_auth("user", "pass").has_auth());
    }

    #[test]
    fn short_string_truncation() {
        let s = short_string(&"a".repeat(100));
        assert_eq!(s.len(), MAX_SHORT_STRING);
        let s = long_string(&"b".repeat(200));
        assert_eq!(s.len(), MAX_LONG_STRING);
    }

    #[test]
    fn string_helpers_utf8_boundary() {
        // 17 four-byte characters do not fit in 64 bytes
        let input = "\u{1F682}".repeat(17);
        let s = short_string(&input);
        assert_eq!(s.len(), 64);
        assert!(core::str::from_utf8(s.as_bytes()).is_ok());
    }

    #[test]
    fn ramp_builder_floors_values() {
        let ramp = RampConfig::default().with_tick_ms(0).with_steps(0, -5);
        assert_eq!(ramp.tick_ms, 1);
        assert_eq!(ramp.accel_step, 1);
        assert_eq!(ramp.brake_step, 1);
    }

    #[test]
    fn parses_minimal_json() {
        let json = r#"{
            "locos": [{
                "address": 3,
                "name": "BR 218",
                "hubs": [{
                    "address": "00:07:80:d0:47:43",
                    "kind": "SBrick",
                    "channels": [
                        {"channel": 0, "device": "motor"},
                        {"channel": 1, "device": "light", "reversed": true}
                    ]
                }]
            }]
        }"#;
        let config = Config::from_json_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.mqtt.topic_prefix.as_str(), "trains");
        assert_eq!(config.controller.cycle_delay_ms, 3000);

        let loco = &config.locos[0];
        assert!(loco.enabled);
        assert_eq!(loco.hubs[0].kind, HubKind::SBrick);
        assert!(loco.hubs[0].enabled);
        assert!(loco.hubs[0].channels[1].reversed);
    }

    #[test]
    fn partial_controller_section_keeps_defaults() {
        let json = r#"{"controller": {"cycle_delay_ms": 500}, "locos": []}"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.controller.cycle_delay_ms, 500);
        assert_eq!(config.controller.scan_duration_ms, 3000);
        assert_eq!(config.controller.ramp, RampConfig::default());
    }

    #[test]
    fn rejects_duplicate_loco() {
        let config = Config::default()
            .with_loco(LocoConfig::new(1, "a").with_hub(sbrick("aa")))
            .with_loco(LocoConfig::new(1, "b").with_hub(sbrick("bb")));
        assert!(matches!(config.validate(), Err(ConfigError::DuplicateLoco(1))));
    }

    #[test]
    fn rejects_loco_without_hubs() {
        let config = Config::default().with_loco(LocoConfig::new(7, "empty"));
        assert!(matches!(config.validate(), Err(ConfigError::NoHubs { loco: 7 })));
    }

    #[test]
    fn rejects_channel_out_of_range() {
        let hub = HubConfig::new("aa", HubKind::PoweredUp).with_channel(ChannelConfig::motor(2));
        let config = Config::default().with_loco(LocoConfig::new(1, "pu").with_hub(hub));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidChannel { channel: 2, .. })
        ));
    }

    #[test]
    fn rejects_action_on_foreign_hub() {
        let event = Event::new(
            Trigger::new(TriggerSource::Sensor, "state", "s1"),
            vec![Action::hub("cc", 0, 100)],
        );
        let config = Config::default().with_loco(
            LocoConfig::new(1, "a")
                .with_hub(sbrick("aa"))
                .with_event(event),
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownActionHub { loco: 1, .. })
        ));
    }

    #[test]
    fn action_hub_match_ignores_case() {
        let event = Event::new(
            Trigger::new(TriggerSource::Sensor, "state", "s1"),
            vec![Action::hub("AA:BB", 0, 100)],
        );
        let config = Config::default().with_loco(
            LocoConfig::new(1, "a")
                .with_hub(sbrick("aa:bb"))
                .with_event(event),
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_queue() {
        let config =
            Config::default().with_controller(ControllerConfig::default().with_queue_length(0));
        assert!(matches!(config.validate(), Err(ConfigError::ZeroQueueLength)));
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = Config::from_file("/nonexistent/rs-trainz-ble.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
