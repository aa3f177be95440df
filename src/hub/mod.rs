//! Hub connection state machine and channel ownership.
//!
//! A [`Hub`] is one BLE hub (SBrick or Powered Up) inside a locomotive. It
//! owns the hub's channels and moves through these states:
//!
//! ```text
//! Disabled                       (never leaves; hub switched off in config)
//! Undiscovered --scan match-->   Discovered
//! Discovered   --connect()-->    Connecting --ok--> Connected
//!                                           --err-> Discovered
//! Connected    --link loss-->    Undiscovered
//! ```
//!
//! The state sits behind one mutex shared (through an `Arc`) by the
//! control loop and the hub's [`RampWorker`]. Cloning a `Hub` clones the
//! handle, not the state.
//!
//! Drive, light, blink, brake and action requests only take effect while
//! connected. Motor channels follow drive requests through the ramp in
//! [`Hub::tick`]; light channels are written immediately.

pub mod protocol;
pub mod ramp;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace, warn};

pub use protocol::{Frame, HubKind, HubProtocol};
pub use ramp::RampWorker;

use crate::channel::{AttachedDevice, HubChannel};
use crate::config::{HubConfig, RampConfig, ShortString};
use crate::events::{Action, ChannelRef};
use crate::traits::{Clock, HubTransport, TransportHandle};

/// Period of one blink phase.
pub const BLINK_PHASE_MS: u64 = 500;

/// Connection lifecycle of a hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HubState {
    /// Switched off in the configuration.
    Disabled,
    /// Waiting to be seen by a scan.
    Undiscovered,
    /// Seen by a scan; ready to connect.
    Discovered,
    /// Connect attempt in progress.
    Connecting,
    /// Connected and accepting commands.
    Connected,
}

impl HubState {
    /// Lowercase name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            HubState::Disabled => "disabled",
            HubState::Undiscovered => "undiscovered",
            HubState::Discovered => "discovered",
            HubState::Connecting => "connecting",
            HubState::Connected => "connected",
        }
    }
}

struct HubShared {
    state: HubState,
    handle: Option<TransportHandle>,
    channels: Vec<HubChannel>,
    drive_power: i16,
    lights_on: bool,
    ebrake: bool,
    blink: Option<Blink>,
    link_lost: bool,
    epoch: u64,
}

#[derive(Clone, Copy)]
struct Blink {
    started_ms: u64,
    until_ms: u64,
}

impl HubShared {
    fn reset_outputs(&mut self) {
        for ch in &mut self.channels {
            ch.force_speed(0);
        }
        self.drive_power = 0;
        self.lights_on = false;
        self.ebrake = false;
        self.blink = None;
    }

    /// Light level right now, ending the blink once its deadline passed.
    fn lights_lit(&mut self, now_ms: u64) -> bool {
        match self.blink {
            Some(blink) if now_ms < blink.until_ms => {
                let phase = now_ms.saturating_sub(blink.started_ms) / BLINK_PHASE_MS;
                phase % 2 == 0
            }
            Some(_) => {
                self.blink = None;
                self.lights_on
            }
            None => self.lights_on,
        }
    }
}

struct HubCore {
    address: ShortString,
    kind: HubKind,
    enabled: bool,
    ramp: RampConfig,
    transport: Arc<dyn HubTransport>,
    clock: Arc<dyn Clock>,
    shared: Mutex<HubShared>,
}

/// One BLE hub of a locomotive.
#[derive(Clone)]
pub struct Hub {
    core: Arc<HubCore>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("address", &self.core.address)
            .field("kind", &self.core.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl Hub {
    /// Create a hub from its configuration.
    ///
    /// Starts `Undiscovered`, or `Disabled` if the configuration says so.
    pub fn new(
        config: &HubConfig,
        ramp: RampConfig,
        transport: Arc<dyn HubTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let protocol = config.kind.protocol();
        let channels = config
            .channels
            .iter()
            .map(|c| HubChannel::new(c.clone(), protocol.min_speed(), protocol.max_speed()))
            .collect();

        let state = if config.enabled {
            HubState::Undiscovered
        } else {
            HubState::Disabled
        };

        Self {
            core: Arc::new(HubCore {
                address: config.address.clone(),
                kind: config.kind,
                enabled: config.enabled,
                ramp,
                transport,
                clock,
                shared: Mutex::new(HubShared {
                    state,
                    handle: None,
                    channels,
                    drive_power: 0,
                    lights_on: false,
                    ebrake: false,
                    blink: None,
                    link_lost: false,
                    epoch: 0,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubShared> {
        self.core.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn protocol(&self) -> &'static dyn HubProtocol {
        self.core.kind.protocol()
    }

    /// Advertised BLE address.
    pub fn address(&self) -> &str {
        self.core.address.as_str()
    }

    /// Hub type.
    pub fn kind(&self) -> HubKind {
        self.core.kind
    }

    /// Whether the hub is enabled in the configuration.
    pub fn is_enabled(&self) -> bool {
        self.core.enabled
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HubState {
        self.lock().state
    }

    /// Whether a scan has found the hub (it may since have connected).
    pub fn is_discovered(&self) -> bool {
        matches!(
            self.state(),
            HubState::Discovered | HubState::Connecting | HubState::Connected
        )
    }

    /// Whether the hub is connected.
    pub fn is_connected(&self) -> bool {
        self.state() == HubState::Connected
    }

    /// Whether the address belongs to this hub (case-insensitive).
    pub fn matches_address(&self, address: &str) -> bool {
        self.core.address.eq_ignore_ascii_case(address)
    }

    /// Record a scan result. Only an `Undiscovered` hub accepts it.
    pub fn attach_discovery(&self, handle: TransportHandle) -> bool {
        let mut shared = self.lock();
        if shared.state != HubState::Undiscovered {
            return false;
        }
        shared.handle = Some(handle);
        shared.state = HubState::Discovered;
        info!(hub = %self.address(), kind = self.core.kind.as_str(), "hub discovered");
        true
    }

    /// Connect to a discovered hub and arm its watchdog.
    ///
    /// `watchdog_timeout` is in tenths of a second; 0 disables the
    /// watchdog on hubs that have one. On failure the hub goes back to
    /// `Discovered` so the next cycle can retry.
    pub fn connect(&self, watchdog_timeout: u8) -> bool {
        let handle = {
            let mut shared = self.lock();
            match (shared.state, shared.handle) {
                (HubState::Connected, _) => return true,
                (HubState::Discovered, Some(handle)) => {
                    shared.state = HubState::Connecting;
                    handle
                }
                _ => return false,
            }
        };

        info!(hub = %self.address(), "connecting");
        let transport = &self.core.transport;

        if let Err(e) = transport.connect(handle, self.core.kind) {
            warn!(hub = %self.address(), error = %e, "connect failed, will retry");
            self.lock().state = HubState::Discovered;
            return false;
        }

        if let Some(frame) = self.protocol().watchdog_frame(watchdog_timeout) {
            if let Err(e) = transport.write(handle, &frame) {
                warn!(hub = %self.address(), error = %e, "failed to set watchdog, will retry");
                if let Err(e) = transport.disconnect(handle) {
                    debug!(hub = %self.address(), error = %e, "disconnect failed");
                }
                self.lock().state = HubState::Discovered;
                return false;
            }
            debug!(hub = %self.address(), timeout = watchdog_timeout, "watchdog armed");
        }

        let mut shared = self.lock();
        shared.reset_outputs();
        shared.link_lost = false;
        shared.epoch += 1;
        shared.state = HubState::Connected;
        info!(hub = %self.address(), "connected");
        true
    }

    /// Drop the link on purpose. Does not count as link loss.
    pub fn disconnect(&self) {
        let mut shared = self.lock();
        if let Some(handle) = shared.handle.take() {
            if let Err(e) = self.core.transport.disconnect(handle) {
                debug!(hub = %self.address(), error = %e, "disconnect failed");
            }
        }
        if shared.state != HubState::Disabled {
            shared.state = HubState::Undiscovered;
        }
        shared.epoch += 1;
        shared.reset_outputs();
        info!(hub = %self.address(), "disconnected");
    }

    /// Check the transport link; a dead link is handled as link loss.
    ///
    /// Returns whether the hub is still connected.
    pub fn check_link(&self) -> bool {
        let mut shared = self.lock();
        if shared.state != HubState::Connected {
            return false;
        }
        let alive = shared
            .handle
            .map_or(false, |h| self.core.transport.is_connected(h));
        if !alive {
            self.lose_link(&mut shared, "transport reports disconnected");
        }
        alive
    }

    /// Identifies the current connection.
    ///
    /// Changes on every connect, disconnect and link loss, so a ramp
    /// worker started for one connection never ticks the next one.
    pub fn connection_epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Consume the link-lost flag set by the last link loss.
    pub fn take_link_lost(&self) -> bool {
        std::mem::take(&mut self.lock().link_lost)
    }

    fn lose_link(&self, shared: &mut HubShared, reason: &str) {
        warn!(hub = %self.address(), reason, "lost connection to hub");
        shared.state = HubState::Undiscovered;
        shared.handle = None;
        shared.link_lost = true;
        shared.epoch += 1;
        shared.reset_outputs();
    }

    fn send(&self, shared: &mut HubShared, frame: &[u8]) -> bool {
        let Some(handle) = shared.handle else {
            return false;
        };
        trace!(hub = %self.address(), ?frame, "write");
        match self.core.transport.write(handle, frame) {
            Ok(()) => true,
            Err(e) => {
                self.lose_link(shared, &e.to_string());
                false
            }
        }
    }

    fn write_lights(&self, shared: &mut HubShared, lit: bool) {
        let protocol = self.protocol();
        let level = if lit { protocol.max_speed() } else { 0 };
        let mut frames = Vec::new();
        for ch in shared
            .channels
            .iter_mut()
            .filter(|c| c.device() == AttachedDevice::Light)
        {
            ch.force_speed(level);
            frames.push(protocol.drive_frame(ch.channel(), level));
        }
        for frame in frames {
            if !self.send(shared, &frame) {
                return;
            }
        }
    }

    /// Switch the lights on or off. Ends a running blink.
    pub fn set_lights(&self, on: bool) {
        let mut shared = self.lock();
        if shared.state != HubState::Connected {
            return;
        }
        shared.lights_on = on;
        shared.blink = None;
        self.write_lights(&mut shared, on);
    }

    /// Whether the lights are switched on (ignoring a running blink).
    pub fn lights_on(&self) -> bool {
        self.lock().lights_on
    }

    /// Blink the lights for `duration_ms`, then restore them.
    pub fn blink_lights(&self, duration_ms: u32) {
        let mut shared = self.lock();
        if shared.state != HubState::Connected {
            return;
        }
        let now = self.core.clock.now_ms();
        shared.blink = Some(Blink {
            started_ms: now,
            until_ms: now.saturating_add(u64::from(duration_ms)),
        });
        let lit = shared.lights_lit(now);
        self.write_lights(&mut shared, lit);
    }

    /// Whether a blink is running.
    pub fn is_blinking(&self) -> bool {
        self.lock().blink.is_some()
    }

    /// Set the drive power of all motor channels.
    ///
    /// `power_percent` is -100..=100. Any non-zero power maps to at least
    /// `min_speed` so the motor overcomes its stall torque. The motors
    /// reach the new speed through the ramp.
    pub fn drive(&self, min_speed: i16, power_percent: i16) {
        let mut shared = self.lock();
        if shared.state != HubState::Connected {
            return;
        }
        let power = power_percent.clamp(-100, 100);
        shared.drive_power = power;

        for ch in shared
            .channels
            .iter_mut()
            .filter(|c| c.device() == AttachedDevice::Motor)
        {
            let speed = drive_speed(min_speed, power, ch.max_speed(), ch.is_reversed());
            ch.set_target_speed(speed);
        }
        debug!(hub = %self.address(), power, "drive");
    }

    /// Last drive power set on this hub.
    pub fn current_drive_power_percent(&self) -> i16 {
        self.lock().drive_power
    }

    /// Engage or release the emergency brake.
    ///
    /// Engaging stops all motors at once and sends brake frames; the ramp
    /// tick keeps braking until released.
    pub fn emergency_brake(&self, enabled: bool) {
        let mut shared = self.lock();
        if shared.state != HubState::Connected {
            return;
        }
        shared.ebrake = enabled;
        if !enabled {
            info!(hub = %self.address(), "emergency brake released");
            return;
        }

        shared.drive_power = 0;
        let protocol = self.protocol();
        let mut frames = Vec::new();
        for ch in shared
            .channels
            .iter_mut()
            .filter(|c| c.device() == AttachedDevice::Motor)
        {
            ch.force_speed(0);
            frames.push(protocol.brake_frame(ch.channel()));
        }
        for frame in frames {
            if !self.send(&mut shared, &frame) {
                break;
            }
        }
        warn!(hub = %self.address(), "emergency brake engaged");
    }

    /// Whether the emergency brake is engaged.
    pub fn is_emergency_braking(&self) -> bool {
        self.lock().ebrake
    }

    /// Execute an action bound to one of this hub's channels.
    ///
    /// Motor channels take the power as a ramp target; anything else is
    /// switched immediately. Returns false for host pin actions, unknown
    /// channels and failed writes. A hub that is not connected accepts the
    /// action without effect, like [`drive`](Self::drive).
    pub fn execute(&self, action: &Action) -> bool {
        let ChannelRef::Hub { channel, .. } = &action.channel else {
            return false;
        };
        let mut shared = self.lock();
        if shared.state != HubState::Connected {
            debug!(hub = %self.address(), channel, "not connected, action ignored");
            return true;
        }

        let power = action.clamped_power();
        let Some(ch) = shared.channels.iter_mut().find(|c| c.channel() == *channel) else {
            warn!(hub = %self.address(), channel, "action for unknown channel");
            return false;
        };

        let speed = drive_speed(0, power, ch.max_speed(), ch.is_reversed());
        if ch.device() == AttachedDevice::Motor {
            ch.set_target_speed(speed);
            return true;
        }

        ch.force_speed(speed);
        let frame = self.protocol().drive_frame(ch.channel(), speed);
        self.send(&mut shared, &frame)
    }

    /// Snapshot of the channel states.
    pub fn channels(&self) -> Vec<HubChannel> {
        self.lock().channels.clone()
    }

    /// One ramp tick on the current connection.
    ///
    /// Advances every motor channel one ramp step (or brakes it while the
    /// emergency brake is engaged), refreshes the lights and writes every
    /// channel. The writes double as the watchdog keep-alive.
    ///
    /// Returns false once the hub is no longer connected.
    pub fn tick(&self) -> bool {
        self.tick_for(self.connection_epoch())
    }

    /// One ramp tick, only if `epoch` is still the current connection.
    ///
    /// Frames are built under the hub lock and written after releasing it,
    /// so other callers are not held up by the transport.
    pub fn tick_for(&self, epoch: u64) -> bool {
        let handle = {
            let shared = self.lock();
            match (shared.state, shared.handle) {
                (HubState::Connected, Some(handle)) if shared.epoch == epoch => handle,
                _ => return false,
            }
        };

        if !self.core.transport.is_connected(handle) {
            self.lose_link_for(epoch, "transport reports disconnected");
            return false;
        }

        let frames = {
            let mut shared = self.lock();
            if shared.epoch != epoch {
                return false;
            }
            self.tick_frames(&mut shared)
        };

        for frame in &frames {
            trace!(hub = %self.address(), ?frame, "write");
            if let Err(e) = self.core.transport.write(handle, frame) {
                self.lose_link_for(epoch, &e.to_string());
                return false;
            }
        }
        true
    }

    fn tick_frames(&self, shared: &mut HubShared) -> Vec<Frame> {
        let now = self.core.clock.now_ms();
        let lit = shared.lights_lit(now);
        let ebrake = shared.ebrake;
        let protocol = self.protocol();
        let ramp = &self.core.ramp;

        let mut frames: Vec<Frame> = Vec::with_capacity(shared.channels.len());
        for ch in &mut shared.channels {
            match ch.device() {
                AttachedDevice::Motor if ebrake => {
                    // Current speed only; a drive issued during the brake keeps its target
                    ch.set_current_speed(0);
                    frames.push(protocol.brake_frame(ch.channel()));
                }
                AttachedDevice::Motor => {
                    let speed = ch.ramp(ramp.accel_step, ramp.brake_step);
                    frames.push(protocol.drive_frame(ch.channel(), speed));
                }
                AttachedDevice::Light => {
                    let level = if lit { protocol.max_speed() } else { 0 };
                    ch.force_speed(level);
                    frames.push(protocol.drive_frame(ch.channel(), level));
                }
                AttachedDevice::Nothing => {}
            }
        }
        frames
    }

    fn lose_link_for(&self, epoch: u64, reason: &str) {
        let mut shared = self.lock();
        if shared.epoch == epoch && shared.state == HubState::Connected {
            self.lose_link(&mut shared, reason);
        }
    }

    /// Spawn the background ramp thread for this hub.
    pub fn start_ramp_worker(&self) -> Option<RampWorker> {
        RampWorker::spawn(self.clone(), self.core.ramp.tick_ms)
    }
}

/// Map a drive power percentage to a channel speed.
///
/// 0 is always 0. Otherwise the magnitude is scaled linearly from
/// `min_speed` (1%) up to `max_speed` (100%).
pub fn drive_speed(min_speed: i16, power_percent: i16, max_speed: i16, reversed: bool) -> i16 {
    if power_percent == 0 {
        return 0;
    }

    let max = i32::from(max_speed.max(0));
    let min = i32::from(min_speed).clamp(0, max);
    let power = i32::from(power_percent.clamp(-100, 100));

    let magnitude = min + (max - min) * power.abs() / 100;
    let signed = if (power < 0) != reversed {
        -magnitude
    } else {
        magnitude
    };
    i16::try_from(signed).unwrap_or(0)
}
