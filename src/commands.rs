//! Command-bus payloads.
//!
//! Every message on `<prefix>/command` is one JSON object tagged by `cmd`.
//!
//! # JSON Examples
//!
//! ```json
//! {"cmd": "drive", "loco": 3, "min_speed": 40, "power": 60}
//! {"cmd": "emergency_brake", "loco": 3, "enabled": true}
//! {"cmd": "emergency_brake"}
//! {"cmd": "trigger", "source": "sensor", "event_type": "state", "event_id": "s1", "value": "on"}
//! {"cmd": "blink", "loco": 3, "duration_ms": 2000}
//! ```
//!
//! `emergency_brake` and `trigger` without `loco` address every
//! locomotive.
//!
//! # Example
//!
//! ```rust
//! use rs_trainz_ble::commands::{parse_command, BusCommand};
//!
//! let cmd = parse_command(br#"{"cmd":"drive","loco":3,"power":-25}"#).unwrap();
//! assert_eq!(cmd, BusCommand::drive(3, 0, -25));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CommandError;
use crate::events::{TriggerEvent, TriggerSource};

fn engaged() -> bool {
    true
}

/// A command received from the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum BusCommand {
    /// Drive one locomotive.
    Drive {
        /// Locomotive address.
        loco: u32,
        /// Lowest non-zero motor speed, in hub speed units.
        #[serde(default)]
        min_speed: i16,
        /// Drive power, -100..=100.
        power: i16,
    },
    /// Engage or release the emergency brake.
    EmergencyBrake {
        /// Locomotive address; all locomotives if absent.
        #[serde(default)]
        loco: Option<u32>,
        /// Engage (`true`, default) or release.
        #[serde(default = "engaged")]
        enabled: bool,
    },
    /// Offer an event to the trigger tables.
    Trigger {
        /// Locomotive address; all locomotives if absent.
        #[serde(default)]
        loco: Option<u32>,
        /// Event source.
        source: TriggerSource,
        /// Event type.
        event_type: String,
        /// Event id.
        #[serde(default)]
        event_id: String,
        /// Event value.
        #[serde(default)]
        value: String,
    },
    /// Blink the lights of one locomotive.
    Blink {
        /// Locomotive address.
        loco: u32,
        /// Blink duration in milliseconds.
        duration_ms: u32,
    },
}

impl BusCommand {
    /// A drive command.
    pub fn drive(loco: u32, min_speed: i16, power: i16) -> Self {
        Self::Drive {
            loco,
            min_speed,
            power,
        }
    }

    /// An emergency brake command; `None` addresses all locomotives.
    pub fn emergency_brake(loco: Option<u32>, enabled: bool) -> Self {
        Self::EmergencyBrake { loco, enabled }
    }

    /// A trigger command; `None` addresses all locomotives.
    pub fn trigger(loco: Option<u32>, event: TriggerEvent) -> Self {
        Self::Trigger {
            loco,
            source: event.source,
            event_type: event.event_type,
            event_id: event.event_id,
            value: event.value,
        }
    }

    /// A blink command.
    pub fn blink(loco: u32, duration_ms: u32) -> Self {
        Self::Blink { loco, duration_ms }
    }

    /// Addressed locomotive, `None` for all.
    pub fn loco(&self) -> Option<u32> {
        match self {
            Self::Drive { loco, .. } | Self::Blink { loco, .. } => Some(*loco),
            Self::EmergencyBrake { loco, .. } | Self::Trigger { loco, .. } => *loco,
        }
    }

    /// Command name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Drive { .. } => "drive",
            Self::EmergencyBrake { .. } => "emergency_brake",
            Self::Trigger { .. } => "trigger",
            Self::Blink { .. } => "blink",
        }
    }
}

/// Parse a bus payload.
pub fn parse_command(payload: &[u8]) -> Result<BusCommand, CommandError> {
    let text = core::str::from_utf8(payload).map_err(|_| CommandError::InvalidUtf8)?;
    Ok(serde_json::from_str(text.trim())?)
}
