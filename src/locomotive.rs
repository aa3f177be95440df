//! Locomotive aggregate: several hubs driven as one vehicle.
//!
//! Every fan-out operation is gated on [`Locomotive::all_hubs_connected`].
//! A locomotive with one hub still missing ignores drive, brake, blink and
//! trigger requests instead of driving half of its motors.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_trainz_ble::channel::ChannelConfig;
//! use rs_trainz_ble::config::{HubConfig, LocoConfig, RampConfig};
//! use rs_trainz_ble::hal::{MockClock, MockTransport};
//! use rs_trainz_ble::hub::HubKind;
//! use rs_trainz_ble::Locomotive;
//!
//! let transport = Arc::new(MockTransport::new());
//! let config = LocoConfig::new(3, "BR 218").with_hub(
//!     HubConfig::new("00:07:80:d0:47:43", HubKind::SBrick).with_channel(ChannelConfig::motor(0)),
//! );
//! let loco = Locomotive::new(&config, RampConfig::default(), transport, Arc::new(MockClock::new()));
//!
//! // Nothing is connected yet, so the drive request is ignored.
//! assert!(!loco.all_hubs_connected());
//! assert!(loco.drive(0, 50).is_empty());
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{LocoConfig, RampConfig, ShortString};
use crate::events::{matching_actions, ChannelRef, Event, TriggerEvent};
use crate::hub::Hub;
use crate::traits::{Clock, Direction, HostController, HubTransport};

/// A locomotive with its hubs and trigger table.
#[derive(Debug)]
pub struct Locomotive {
    address: u32,
    name: ShortString,
    enabled: bool,
    hubs: Vec<Hub>,
    events: Vec<Event>,
}

impl Locomotive {
    /// Build the locomotive and its hubs from configuration.
    pub fn new(
        config: &LocoConfig,
        ramp: RampConfig,
        transport: Arc<dyn HubTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hubs = config
            .hubs
            .iter()
            .map(|h| Hub::new(h, ramp.clone(), transport.clone(), clock.clone()))
            .collect();

        Self {
            address: config.address,
            name: config.name.clone(),
            enabled: config.enabled,
            hubs,
            events: config.events.clone(),
        }
    }

    /// Bus address.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Whether the locomotive is enabled in the configuration.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// All hubs, in configuration order.
    pub fn hubs(&self) -> &[Hub] {
        &self.hubs
    }

    /// Hub by position.
    pub fn hub(&self, index: usize) -> Option<&Hub> {
        self.hubs.get(index)
    }

    /// Number of hubs.
    pub fn hub_count(&self) -> usize {
        self.hubs.len()
    }

    /// Hub by BLE address (case-insensitive).
    pub fn hub_by_address(&self, address: &str) -> Option<&Hub> {
        self.hubs.iter().find(|h| h.matches_address(address))
    }

    /// Trigger table.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Whether the locomotive is enabled and every one of its hubs is
    /// connected.
    pub fn all_hubs_connected(&self) -> bool {
        self.enabled && self.hubs.iter().all(Hub::is_connected)
    }

    fn gate(&self, what: &str) -> bool {
        if self.all_hubs_connected() {
            return true;
        }
        info!(
            loco = self.name(),
            "ignored {what} because not all its hubs are connected (yet)"
        );
        false
    }

    /// Drive every hub.
    ///
    /// Returns the `dirchanged` events raised by hubs that started moving
    /// or came to a stop, one per hub, for the caller to offer to
    /// [`trigger_event`](Self::trigger_event).
    pub fn drive(&self, min_speed: i16, power_percent: i16) -> Vec<TriggerEvent> {
        if !self.gate("drive command") {
            return Vec::new();
        }

        let mut raised = Vec::new();
        for hub in &self.hubs {
            let before = hub.current_drive_power_percent();
            hub.drive(min_speed, power_percent);
            let after = hub.current_drive_power_percent();

            match (before, Direction::of(after)) {
                (0, Direction::Forward) | (0, Direction::Backward) => {
                    raised.push(TriggerEvent::dir_changed(Direction::of(after)));
                }
                (b, Direction::Stopped) if b != 0 => {
                    raised.push(TriggerEvent::dir_changed(Direction::Stopped));
                }
                _ => {}
            }
        }

        debug!(loco = self.name(), power = power_percent, raised = raised.len(), "drive");
        raised
    }

    /// Run the actions of every event matching `input`.
    ///
    /// Hub channel actions go to the owning hub; host pin actions go to
    /// `host`. Returns the number of actions executed.
    pub fn trigger_event<H: HostController>(&self, input: &TriggerEvent, host: &mut H) -> usize {
        if !self.gate("trigger") {
            return 0;
        }

        let mut executed = 0;
        for action in matching_actions(&self.events, input) {
            match &action.channel {
                ChannelRef::Hub { hub, .. } => match self.hub_by_address(hub) {
                    Some(target) => {
                        if target.execute(action) {
                            executed += 1;
                        }
                    }
                    None => warn!(loco = self.name(), hub = %hub, "action for unknown hub"),
                },
                ChannelRef::HostPin { pin } => match host.execute(action) {
                    Ok(()) => executed += 1,
                    Err(e) => warn!(loco = self.name(), pin, error = ?e, "host action failed"),
                },
            }
        }

        debug!(
            loco = self.name(),
            event_type = %input.event_type,
            value = %input.value,
            executed,
            "trigger"
        );
        executed
    }

    /// Blink the lights of every hub.
    pub fn blink_lights(&self, duration_ms: u32) {
        if !self.gate("blink request") {
            return;
        }
        for hub in &self.hubs {
            hub.blink_lights(duration_ms);
        }
    }

    /// Engage or release the emergency brake on every hub.
    pub fn emergency_brake(&self, enabled: bool) {
        if !self.gate("emergency brake") {
            return;
        }
        for hub in &self.hubs {
            hub.emergency_brake(enabled);
        }
    }

    /// Brake the hubs that are still connected after one of them lost its
    /// link. Returns how many hubs were braked.
    ///
    /// Unlike [`emergency_brake`](Self::emergency_brake) this is not gated:
    /// by definition not every hub is connected any more.
    pub fn brake_on_link_loss(&self) -> usize {
        let mut braked = 0;
        for hub in self.hubs.iter().filter(|h| h.is_connected()) {
            hub.emergency_brake(true);
            braked += 1;
        }
        if braked > 0 {
            warn!(loco = self.name(), hubs = braked, "hub lost, braking remaining hubs");
        }
        braked
    }
}
