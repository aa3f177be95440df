//! The control loop.
//!
//! One thread owns the locomotives and drives everything that is not a
//! ramp tick:
//!
//! 1. Connect discovered hubs of locomotives that are not fully connected,
//!    greeting each new connection with a light handshake, and collect the
//!    undiscovered ones.
//! 2. Run one discovery scan for all collected hubs.
//! 3. Handle link losses (optionally braking the rest of the locomotive).
//! 4. Drain and execute queued bus commands.
//!
//! [`ControlLoop::run`] repeats this forever, draining commands in short
//! slices while it waits for the next cycle.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_trainz_ble::channel::ChannelConfig;
//! use rs_trainz_ble::config::{Config, ControllerConfig, HubConfig, LocoConfig};
//! use rs_trainz_ble::hal::{MockClock, MockDelay, MockHost, MockTransport};
//! use rs_trainz_ble::hub::HubKind;
//! use rs_trainz_ble::ControlLoop;
//!
//! let config = Config::default()
//!     .with_controller(ControllerConfig::default().with_background_ramp(false))
//!     .with_loco(LocoConfig::new(3, "BR 218").with_hub(
//!         HubConfig::new("00:07:80:d0:47:43", HubKind::SBrick).with_channel(ChannelConfig::motor(0)),
//!     ));
//!
//! let transport = Arc::new(MockTransport::new());
//! transport.add_peripheral("00:07:80:d0:47:43");
//!
//! let (mut control, commands) = ControlLoop::from_config(
//!     &config,
//!     transport,
//!     Arc::new(MockClock::new()),
//!     MockHost::new(),
//!     MockDelay::new(),
//! );
//!
//! control.run_cycle(); // discovers
//! let report = control.run_cycle(); // connects
//! assert_eq!(report.fully_connected, vec![3]);
//!
//! commands.submit("trains/command", br#"{"cmd":"drive","loco":3,"power":50}"#);
//! assert_eq!(control.process_commands(), 1);
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::commands::{parse_command, BusCommand};
use crate::config::{Config, ControllerConfig};
use crate::discovery::DiscoveryScanner;
use crate::events::TriggerEvent;
use crate::hub::{Hub, HubState, RampWorker};
use crate::ingress::{command_queue, IngressReceiver, IngressSender};
use crate::locomotive::Locomotive;
use crate::traits::{Clock, Delay, HostController, HubTransport};

/// The configured locomotives, looked up by bus address.
#[derive(Debug, Default)]
pub struct LocoRegistry {
    locos: Vec<Locomotive>,
}

impl LocoRegistry {
    /// Wrap already built locomotives.
    pub fn new(locos: Vec<Locomotive>) -> Self {
        Self { locos }
    }

    /// Build every configured locomotive.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn HubTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ramp = &config.controller.ramp;
        Self::new(
            config
                .locos
                .iter()
                .map(|l| Locomotive::new(l, ramp.clone(), transport.clone(), clock.clone()))
                .collect(),
        )
    }

    /// Locomotive by address.
    pub fn get(&self, address: u32) -> Option<&Locomotive> {
        self.locos.iter().find(|l| l.address() == address)
    }

    /// All locomotives in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Locomotive> {
        self.locos.iter()
    }

    /// Number of locomotives.
    pub fn len(&self) -> usize {
        self.locos.len()
    }

    /// Whether no locomotive is configured.
    pub fn is_empty(&self) -> bool {
        self.locos.is_empty()
    }

    /// One locomotive, or all of them for `None`.
    ///
    /// An unknown address selects nothing and is logged.
    pub fn select(&self, address: Option<u32>) -> Vec<&Locomotive> {
        match address {
            None => self.locos.iter().collect(),
            Some(address) => match self.get(address) {
                Some(loco) => vec![loco],
                None => {
                    warn!(loco = address, "command for unknown locomotive");
                    Vec::new()
                }
            },
        }
    }
}

/// What one control loop cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Hubs connected during this cycle.
    pub connected: usize,
    /// Whether a discovery scan ran.
    pub scanned: bool,
    /// Hubs found by the scan.
    pub discovered: usize,
    /// Hubs whose link dropped since the last cycle.
    pub links_lost: usize,
    /// Locomotives that became fully connected, by address.
    pub fully_connected: Vec<u32>,
    /// Bus commands executed.
    pub commands: usize,
}

/// Single-threaded driver of discovery, connection and commands.
pub struct ControlLoop<H: HostController, D: Delay> {
    config: ControllerConfig,
    registry: LocoRegistry,
    scanner: DiscoveryScanner,
    commands: IngressReceiver,
    host: H,
    delay: D,
    workers: Vec<RampWorker>,
}

impl<H: HostController, D: Delay> ControlLoop<H, D> {
    /// Assemble a control loop from its parts.
    pub fn new(
        config: ControllerConfig,
        registry: LocoRegistry,
        scanner: DiscoveryScanner,
        commands: IngressReceiver,
        host: H,
        delay: D,
    ) -> Self {
        Self {
            config,
            registry,
            scanner,
            commands,
            host,
            delay,
            workers: Vec::new(),
        }
    }

    /// Build the whole controller from configuration.
    ///
    /// Returns the loop and the sender bus clients feed commands into.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn HubTransport>,
        clock: Arc<dyn Clock>,
        host: H,
        delay: D,
    ) -> (Self, IngressSender) {
        let controller = &config.controller;
        let (tx, rx) = command_queue(controller.queue_length);
        let scanner = DiscoveryScanner::new(
            transport.clone(),
            Duration::from_millis(u64::from(controller.scan_duration_ms)),
        );
        let registry = LocoRegistry::from_config(config, transport, clock);
        (
            Self::new(controller.clone(), registry, scanner, rx, host, delay),
            tx,
        )
    }

    /// The locomotives.
    pub fn registry(&self) -> &LocoRegistry {
        &self.registry
    }

    /// The host controller.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The delay implementation.
    pub fn delay(&self) -> &D {
        &self.delay
    }

    /// Commands dropped because the queue was full.
    pub fn dropped_commands(&self) -> usize {
        self.commands.dropped()
    }

    /// Ramp workers still running.
    pub fn active_workers(&self) -> usize {
        self.workers.iter().filter(|w| !w.is_finished()).count()
    }

    /// Run one cycle: connect, discover, handle link loss, drain commands.
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();
        self.workers.retain(|w| !w.is_finished());

        let mut batch: Vec<&Hub> = Vec::new();
        for loco in self.registry.iter().filter(|l| l.is_enabled()) {
            if loco.all_hubs_connected() {
                continue;
            }

            for hub in loco.hubs().iter().filter(|h| h.is_enabled()) {
                match hub.state() {
                    HubState::Undiscovered => batch.push(hub),
                    HubState::Discovered => {
                        if !hub.connect(self.config.watchdog_timeout) {
                            continue;
                        }
                        report.connected += 1;
                        handshake(hub, &mut self.delay, self.config.handshake_blink_ms);
                        if self.config.background_ramp {
                            self.workers.extend(hub.start_ramp_worker());
                        }
                    }
                    _ => {}
                }
            }

            if loco.all_hubs_connected() {
                info!(loco = loco.name(), "all hubs connected");
                report.fully_connected.push(loco.address());
            }
        }

        if !batch.is_empty() {
            report.scanned = true;
            match self.scanner.discover(&batch) {
                Ok(found) => report.discovered = found,
                Err(e) => warn!(error = %e, "discovery failed, will retry"),
            }
        }

        report.links_lost = self.handle_link_loss();
        report.commands = self.process_commands();

        debug!(?report, "cycle");
        report
    }

    fn handle_link_loss(&mut self) -> usize {
        let mut lost_total = 0;
        for loco in self.registry.iter() {
            let mut lost = 0;
            for hub in loco.hubs() {
                hub.check_link();
                if hub.take_link_lost() {
                    lost += 1;
                }
            }
            if lost > 0 && self.config.brake_on_disconnect {
                loco.brake_on_link_loss();
            }
            lost_total += lost;
        }
        lost_total
    }

    /// Execute every queued command. Returns how many were executed.
    ///
    /// Malformed payloads are logged and discarded.
    pub fn process_commands(&mut self) -> usize {
        let mut executed = 0;
        for message in self.commands.drain() {
            match parse_command(&message.payload) {
                Ok(command) => {
                    if self.handle_command(command) {
                        executed += 1;
                    }
                }
                Err(e) => warn!(topic = %message.topic, error = %e, "discarding command"),
            }
        }
        executed
    }

    /// Execute one command. Returns false if it addressed no locomotive.
    pub fn handle_command(&mut self, command: BusCommand) -> bool {
        debug!(cmd = command.name(), loco = ?command.loco(), "command");
        let targets = self.registry.select(command.loco());
        if targets.is_empty() {
            return false;
        }

        match command {
            BusCommand::Drive {
                min_speed, power, ..
            } => {
                for loco in targets {
                    for event in loco.drive(min_speed, power) {
                        loco.trigger_event(&event, &mut self.host);
                    }
                }
            }
            BusCommand::EmergencyBrake { enabled, .. } => {
                for loco in targets {
                    loco.emergency_brake(enabled);
                }
            }
            BusCommand::Trigger {
                source,
                event_type,
                event_id,
                value,
                ..
            } => {
                let event = TriggerEvent::new(source, event_type, event_id, value);
                for loco in targets {
                    loco.trigger_event(&event, &mut self.host);
                }
            }
            BusCommand::Blink { duration_ms, .. } => {
                for loco in targets {
                    loco.blink_lights(duration_ms);
                }
            }
        }
        true
    }

    /// Run one cycle, then wait out the cycle delay while draining
    /// commands every `command_poll_ms`.
    pub fn step(&mut self) -> CycleReport {
        let mut report = self.run_cycle();

        let slice = self.config.command_poll_ms.max(1);
        let mut remaining = self.config.cycle_delay_ms;
        while remaining > 0 {
            let wait = remaining.min(slice);
            self.delay.delay_ms(wait);
            remaining -= wait;
            report.commands += self.process_commands();
        }
        report
    }

    /// Run forever.
    pub fn run(&mut self) -> ! {
        info!(locos = self.registry.len(), "control loop started");
        loop {
            self.step();
        }
    }

    /// Brake and disconnect every hub, then wait for the ramp workers.
    pub fn shutdown(&mut self) {
        for loco in self.registry.iter() {
            for hub in loco.hubs() {
                if hub.is_connected() {
                    hub.emergency_brake(true);
                }
                hub.disconnect();
            }
        }
        for worker in self.workers.drain(..) {
            worker.join();
        }
        info!("control loop stopped");
    }
}

/// Greet a new connection: lights on, off, on, off, on.
fn handshake<D: Delay>(hub: &Hub, delay: &mut D, blink_ms: u32) {
    hub.set_lights(true);
    for on in [false, true, false, true] {
        delay.delay_ms(blink_ms);
        hub.set_lights(on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::config::{HubConfig, LocoConfig};
    use crate::events::{Action, Event, Trigger, TriggerSource};
    use crate::hal::{MockClock, MockDelay, MockHost, MockTransport};
    use crate::hub::HubKind;

    const HUB_A: &str = "00:07:80:d0:47:43";

    type TestLoop = ControlLoop<MockHost, MockDelay>;

    fn config() -> Config {
        Config::default()
            .with_controller(
                ControllerConfig::default()
                    .with_background_ramp(false)
                    .with_cycle_delay_ms(100)
                    .with_command_poll_ms(30),
            )
            .with_loco(
                LocoConfig::new(3, "BR 218")
                    .with_hub(
                        HubConfig::new(HUB_A, HubKind::SBrick)
                            .with_channel(ChannelConfig::motor(0))
                            .with_channel(ChannelConfig::light(1)),
                    )
                    .with_event(Event::new(
                        Trigger::new(TriggerSource::Loco, "dirchanged", "").with_value("forward"),
                        vec![Action::host_pin(7, 100)],
                    )),
            )
    }

    fn build(config: &Config) -> (TestLoop, IngressSender, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let (control, tx) = ControlLoop::from_config(
            config,
            transport.clone(),
            Arc::new(MockClock::new()),
            MockHost::new(),
            MockDelay::new(),
        );
        (control, tx, transport)
    }

    #[test]
    fn handshake_toggles_lights_five_times() {
        let (mut control, _tx, transport) = build(&config());
        let handle = transport.add_peripheral(HUB_A);
        control.run_cycle();
        transport.clear_writes();

        control.run_cycle();
        let light_writes: Vec<_> = transport
            .writes_to(handle)
            .into_iter()
            .filter(|f| f.len() == 4 && f[1] == 1)
            .map(|f| f[3])
            .collect();
        assert_eq!(light_writes, vec![255, 0, 255, 0, 255]);
        assert_eq!(control.delay().delays, vec![250; 4]);
    }

    #[test]
    fn drive_command_dispatches_dir_changed() {
        let (mut control, tx, transport) = build(&config());
        transport.add_peripheral(HUB_A);
        control.run_cycle();
        control.run_cycle();

        tx.submit("trains/command", br#"{"cmd":"drive","loco":3,"power":50}"#);
        assert_eq!(control.process_commands(), 1);
        assert_eq!(control.host().executed, vec![Action::host_pin(7, 100)]);
    }

    #[test]
    fn unknown_and_malformed_commands() {
        let (mut control, tx, _) = build(&config());
        tx.submit("trains/command", br#"{"cmd":"blink","loco":9,"duration_ms":10}"#);
        tx.submit("trains/command", b"not json");
        tx.submit("trains/command", br#"{"cmd":"emergency_brake"}"#);
        assert_eq!(control.process_commands(), 1);
    }

    #[test]
    fn step_drains_commands_while_waiting() {
        let (mut control, tx, _) = build(&config());
        tx.submit("trains/command", br#"{"cmd":"emergency_brake","loco":3}"#);
        let report = control.step();
        assert_eq!(report.commands, 1);
        assert_eq!(control.delay().delays, vec![30, 30, 30, 10]);
    }

    #[test]
    fn link_loss_reported_once() {
        let (mut control, _tx, transport) = build(&config());
        transport.add_peripheral(HUB_A);
        control.run_cycle();
        control.run_cycle();

        transport.drop_link(HUB_A);
        assert_eq!(control.run_cycle().links_lost, 1);
        let hub = control.registry().get(3).unwrap().hub(0).unwrap();
        assert_eq!(hub.state(), HubState::Undiscovered);

        let report = control.run_cycle();
        assert_eq!(report.links_lost, 0);
        assert!(report.scanned);
        assert_eq!(report.discovered, 1);
    }

    #[test]
    fn shutdown_disconnects() {
        let (mut control, _tx, transport) = build(&config());
        let handle = transport.add_peripheral(HUB_A);
        control.run_cycle();
        control.run_cycle();
        control.shutdown();
        assert!(!transport.is_connected(handle));
        assert!(!control.registry().get(3).unwrap().all_hubs_connected());
    }
}
