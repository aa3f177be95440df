//! Event/trigger/action binding and matching.
//!
//! Each locomotive carries a table of [`Event`]s. An event fires when one
//! of its [`Trigger`]s matches a runtime [`TriggerEvent`], and then runs its
//! [`Action`]s in configuration order.
//!
//! Matching is exact: source, event type and event id must be equal, and
//! the trigger's value is either unset (wildcard) or equal to the input
//! value. There is no prefix or partial matching, and all matching events
//! fire; nothing short-circuits.
//!
//! # Example
//!
//! ```rust
//! use rs_trainz_ble::events::{Trigger, TriggerEvent, TriggerSource};
//! use rs_trainz_ble::Direction;
//!
//! let any_dir = Trigger::new(TriggerSource::Loco, "dirchanged", "");
//! let forward_only = any_dir.clone().with_value("forward");
//!
//! let fwd = TriggerEvent::dir_changed(Direction::Forward);
//! let bwd = TriggerEvent::dir_changed(Direction::Backward);
//!
//! assert!(any_dir.matches(&fwd) && any_dir.matches(&bwd));
//! assert!(forward_only.matches(&fwd));
//! assert!(!forward_only.matches(&bwd));
//! ```

use serde::{Deserialize, Serialize};

use crate::config::ShortString;
use crate::traits::Direction;

/// Event type raised when a hub starts moving or comes to a stop.
pub const DIR_CHANGED: &str = "dirchanged";

/// Where a trigger comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    /// Raised by the locomotive itself (e.g. direction changes).
    Loco,
    /// A layout sensor.
    Sensor,
    /// A function key on the throttle.
    #[serde(rename = "fn")]
    Function,
    /// Triggered by hand.
    Manual,
}

/// A runtime event offered to the trigger tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Origin of the event.
    pub source: TriggerSource,
    /// Event type, e.g. `dirchanged`.
    pub event_type: String,
    /// Event id, e.g. a sensor name. May be empty.
    pub event_id: String,
    /// Event value, e.g. `forward`. May be empty.
    pub value: String,
}

impl TriggerEvent {
    /// Create a new trigger event.
    pub fn new(
        source: TriggerSource,
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            source,
            event_type: event_type.into(),
            event_id: event_id.into(),
            value: value.into(),
        }
    }

    /// The `Loco/dirchanged` event for a new direction.
    pub fn dir_changed(direction: Direction) -> Self {
        Self::new(TriggerSource::Loco, DIR_CHANGED, "", direction.as_str())
    }
}

/// Condition part of an [`Event`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// Required source.
    pub source: TriggerSource,
    /// Required event type.
    pub event_type: String,
    /// Required event id.
    #[serde(default)]
    pub event_id: String,
    /// Required value; `None` matches any value.
    #[serde(default)]
    pub value: Option<String>,
}

impl Trigger {
    /// A trigger matching any value.
    pub fn new(
        source: TriggerSource,
        event_type: impl Into<String>,
        event_id: impl Into<String>,
    ) -> Self {
        Self {
            source,
            event_type: event_type.into(),
            event_id: event_id.into(),
            value: None,
        }
    }

    /// Restrict the trigger to one value.
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Whether this trigger matches the event.
    pub fn matches(&self, input: &TriggerEvent) -> bool {
        self.source == input.source
            && self.event_type == input.event_type
            && self.event_id == input.event_id
            && self.value.as_deref().map_or(true, |v| v == input.value)
    }
}

/// The output an action drives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelRef {
    /// A channel on one of the locomotive's hubs.
    Hub {
        /// Hub address.
        hub: ShortString,
        /// Channel index on that hub.
        channel: u8,
    },
    /// A pin on the controller itself.
    HostPin {
        /// Pin number.
        pin: u8,
    },
}

/// Something to do when an event fires.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Target output.
    pub channel: ChannelRef,
    /// Output level, -100..=100; 0 switches the output off.
    #[serde(default = "full_power")]
    pub power_percent: i16,
}

fn full_power() -> i16 {
    100
}

impl Action {
    /// An action on a hub channel.
    pub fn hub(hub: &str, channel: u8, power_percent: i16) -> Self {
        Self {
            channel: ChannelRef::Hub {
                hub: crate::config::short_string(hub),
                channel,
            },
            power_percent,
        }
    }

    /// An action on a host pin.
    pub fn host_pin(pin: u8, power_percent: i16) -> Self {
        Self {
            channel: ChannelRef::HostPin { pin },
            power_percent,
        }
    }

    /// Power clamped to the valid range.
    pub fn clamped_power(&self) -> i16 {
        self.power_percent.clamp(-100, 100)
    }
}

/// A trigger table entry: any matching trigger runs all actions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Conditions; the event fires if any of them matches.
    pub triggers: Vec<Trigger>,
    /// Actions, executed in order.
    pub actions: Vec<Action>,
}

impl Event {
    /// An event with a single trigger.
    pub fn new(trigger: Trigger, actions: Vec<Action>) -> Self {
        Self {
            triggers: vec![trigger],
            actions,
        }
    }

    /// Whether any trigger of this event matches.
    pub fn has_trigger(&self, input: &TriggerEvent) -> bool {
        self.triggers.iter().any(|t| t.matches(input))
    }
}

/// All actions to run for `input`, in configuration order.
///
/// Every matching event contributes its actions.
pub fn matching_actions<'a>(
    events: &'a [Event],
    input: &'a TriggerEvent,
) -> impl Iterator<Item = &'a Action> + 'a {
    events
        .iter()
        .filter(move |e| e.has_trigger(input))
        .flat_map(|e| e.actions.iter())
}
