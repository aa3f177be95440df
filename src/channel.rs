//! Per-channel speed governor.
//!
//! A [`HubChannel`] is one output (motor or light) of a hub. It tracks the
//! speed the channel should reach (`target_speed`) and the speed the hub is
//! actually being told (`current_speed`). Drive commands only move the
//! target; the periodic ramp tick walks the current speed towards it.
//!
//! # Example
//!
//! ```rust
//! use rs_trainz_ble::channel::{ChannelConfig, HubChannel};
//!
//! let mut ch = HubChannel::new(ChannelConfig::motor(0), -255, 255);
//! ch.set_target_speed(100);
//! assert!(ch.is_accelerating());
//!
//! // Ramp in steps of 40; the last step lands exactly on the target.
//! assert_eq!(ch.ramp(40, 80), 40);
//! assert_eq!(ch.ramp(40, 80), 80);
//! assert_eq!(ch.ramp(40, 80), 100);
//! assert!(ch.is_at_target_speed());
//! ```

use serde::{Deserialize, Serialize};

use crate::traits::Direction;

/// What is plugged into a hub channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachedDevice {
    /// Nothing attached; the channel is never written.
    #[default]
    Nothing,
    /// A motor; follows drive commands through the ramp.
    Motor,
    /// A light; switched on/off immediately.
    Light,
}

/// Static configuration of one hub channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel index on the hub (SBrick A-D = 0-3, Powered Up A-B = 0-1).
    pub channel: u8,
    /// Attached device.
    #[serde(default)]
    pub device: AttachedDevice,
    /// Invert the direction of this channel (motor mounted backwards).
    #[serde(default)]
    pub reversed: bool,
}

impl ChannelConfig {
    /// A motor channel.
    pub fn motor(channel: u8) -> Self {
        Self {
            channel,
            device: AttachedDevice::Motor,
            reversed: false,
        }
    }

    /// A light channel.
    pub fn light(channel: u8) -> Self {
        Self {
            channel,
            device: AttachedDevice::Light,
            reversed: false,
        }
    }

    /// Invert the channel direction.
    pub fn with_reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }
}

/// Speed state of one hub channel.
///
/// Both speeds are always within `[min_speed, max_speed]`, and the current
/// speed never overshoots the target in the target's direction of travel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubChannel {
    config: ChannelConfig,
    min_speed: i16,
    max_speed: i16,
    target_speed: i16,
    current_speed: i16,
}

impl HubChannel {
    /// Create a stopped channel with the speed range of its hub type.
    pub fn new(config: ChannelConfig, min_speed: i16, max_speed: i16) -> Self {
        Self {
            config,
            min_speed,
            max_speed,
            target_speed: 0,
            current_speed: 0,
        }
    }

    /// Channel index on the hub.
    #[inline]
    pub fn channel(&self) -> u8 {
        self.config.channel
    }

    /// Device attached to the channel.
    #[inline]
    pub fn device(&self) -> AttachedDevice {
        self.config.device
    }

    /// Whether the channel direction is inverted.
    #[inline]
    pub fn is_reversed(&self) -> bool {
        self.config.reversed
    }

    /// Lowest speed the hub accepts (full backward).
    #[inline]
    pub fn min_speed(&self) -> i16 {
        self.min_speed
    }

    /// Highest speed the hub accepts (full forward).
    #[inline]
    pub fn max_speed(&self) -> i16 {
        self.max_speed
    }

    /// The speed the ramp is heading for.
    #[inline]
    pub fn target_speed(&self) -> i16 {
        self.target_speed
    }

    /// Set the target speed, clamped to the channel range. No ramp is
    /// applied to the target itself.
    pub fn set_target_speed(&mut self, speed: i16) {
        self.target_speed = speed.clamp(self.min_speed, self.max_speed);
    }

    /// Direction of the target; zero counts as forward.
    pub fn target_direction(&self) -> Direction {
        if self.target_speed >= 0 {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    /// The speed last sent (or about to be sent) to the hub.
    #[inline]
    pub fn current_speed(&self) -> i16 {
        self.current_speed
    }

    /// Magnitude of the current speed.
    #[inline]
    pub fn abs_current_speed(&self) -> u16 {
        self.current_speed.unsigned_abs()
    }

    /// Direction of the current speed; zero counts as forward.
    pub fn current_direction(&self) -> Direction {
        if self.current_speed >= 0 {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }

    /// Store a new current speed.
    ///
    /// A candidate that would pass the target in the target's direction,
    /// while also moving away from the present value, is replaced by the
    /// target. Anything else is clamped to the channel range.
    pub fn set_current_speed(&mut self, speed: i16) {
        let target = self.target_speed;
        let current = self.current_speed;

        if (target < 0 && speed < target && speed < current)
            || (target >= 0 && speed > target && speed > current)
        {
            self.current_speed = target;
            return;
        }

        self.current_speed = speed.clamp(self.min_speed, self.max_speed);
    }

    /// Set target and current speed at once, bypassing the ramp.
    ///
    /// Used for lights and emergency braking.
    pub fn force_speed(&mut self, speed: i16) {
        let speed = speed.clamp(self.min_speed, self.max_speed);
        self.target_speed = speed;
        self.current_speed = speed;
    }

    /// Whether the channel is speeding up.
    ///
    /// False at target, and false while current and target point in
    /// opposite directions (the channel must slow down through zero first).
    pub fn is_accelerating(&self) -> bool {
        if self.is_at_target_speed() {
            return false;
        }

        if opposite_signs(self.current_speed, self.target_speed) {
            return false;
        }

        self.target_speed.unsigned_abs() > self.current_speed.unsigned_abs()
    }

    /// Whether current speed equals target speed.
    #[inline]
    pub fn is_at_target_speed(&self) -> bool {
        self.current_speed == self.target_speed
    }

    /// Advance the current speed one ramp step and return it.
    ///
    /// Accelerates by `accel_step` towards the target. Decelerates by
    /// `brake_step` towards the target, or towards zero when the target
    /// lies in the other direction; zero is never crossed in one step.
    pub fn ramp(&mut self, accel_step: i16, brake_step: i16) -> i16 {
        let accel_step = accel_step.max(1);
        let brake_step = brake_step.max(1);
        let current = self.current_speed;
        let target = self.target_speed;

        if current == target {
            return current;
        }

        let next = if self.is_accelerating() {
            if target > current {
                current.saturating_add(accel_step)
            } else {
                current.saturating_sub(accel_step)
            }
        } else if opposite_signs(current, target) {
            if current > 0 {
                current.saturating_sub(brake_step).max(0)
            } else {
                current.saturating_add(brake_step).min(0)
            }
        } else if current > target {
            current.saturating_sub(brake_step).max(target)
        } else {
            current.saturating_add(brake_step).min(target)
        };

        self.set_current_speed(next);
        self.current_speed
    }
}

fn opposite_signs(a: i16, b: i16) -> bool {
    i32::from(a) * i32::from(b) < 0
}
