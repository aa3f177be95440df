//! Frame encoding for the supported hub types.
//!
//! | Hub | Speed range | Channels | Watchdog |
//! |-----|-------------|----------|----------|
//! | SBrick | -255..=255 | 4 (A-D) | `0x0D <tenths>` |
//! | Powered Up | -100..=100 | 2 (A-B) | none |
//!
//! SBrick frames go to the remote control characteristic:
//!
//! ```text
//! 0x00 ch              brake channel
//! 0x01 ch dir speed    drive channel (dir 0 = clockwise, 1 = counter-clockwise)
//! 0x0D t               set watchdog timeout in 0.1 s (0 disables)
//! ```
//!
//! Powered Up frames are LWP3 port output commands
//! (`WriteDirectModeData`, `StartPower`):
//!
//! ```text
//! 0x08 0x00 0x81 port 0x11 0x51 0x00 power
//! ```
//!
//! where a power of 127 brakes the motor.

use serde::{Deserialize, Serialize};

/// Encoded protocol frame.
pub type Frame = heapless::Vec<u8, 8>;

/// Hub type, selected per hub in the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HubKind {
    /// Vengit SBrick / SBrick Plus.
    #[serde(rename = "sbrick", alias = "SBrick")]
    SBrick,
    /// LEGO Powered Up hub.
    #[serde(rename = "pu", alias = "PU", alias = "powered_up")]
    PoweredUp,
}

impl HubKind {
    /// The protocol encoder for this hub type.
    pub fn protocol(self) -> &'static dyn HubProtocol {
        match self {
            HubKind::SBrick => &SBrick,
            HubKind::PoweredUp => &PoweredUp,
        }
    }

    /// Short name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            HubKind::SBrick => "SBrick",
            HubKind::PoweredUp => "PU",
        }
    }
}

/// What differs between hub types on the wire.
pub trait HubProtocol: Send + Sync {
    /// Number of output channels.
    fn channel_count(&self) -> u8;

    /// Lowest channel speed (full backward).
    fn min_speed(&self) -> i16;

    /// Highest channel speed (full forward).
    fn max_speed(&self) -> i16;

    /// Frame that arms the hub watchdog, if the hub has one.
    fn watchdog_frame(&self, timeout_tenths: u8) -> Option<Frame>;

    /// Frame that sets a channel to a signed speed.
    fn drive_frame(&self, channel: u8, speed: i16) -> Frame;

    /// Frame that actively brakes a channel.
    fn brake_frame(&self, channel: u8) -> Frame;
}

/// SBrick encoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct SBrick;

const SBRICK_CMD_BRAKE: u8 = 0x00;
const SBRICK_CMD_DRIVE: u8 = 0x01;
const SBRICK_CMD_SET_WATCHDOG: u8 = 0x0D;

impl HubProtocol for SBrick {
    fn channel_count(&self) -> u8 {
        4
    }

    fn min_speed(&self) -> i16 {
        -255
    }

    fn max_speed(&self) -> i16 {
        255
    }

    fn watchdog_frame(&self, timeout_tenths: u8) -> Option<Frame> {
        Some(frame(&[SBRICK_CMD_SET_WATCHDOG, timeout_tenths]))
    }

    fn drive_frame(&self, channel: u8, speed: i16) -> Frame {
        let speed = speed.clamp(self.min_speed(), self.max_speed());
        let dir = u8::from(speed < 0);
        let magnitude = u8::try_from(speed.unsigned_abs()).unwrap_or(u8::MAX);
        frame(&[SBRICK_CMD_DRIVE, channel, dir, magnitude])
    }

    fn brake_frame(&self, channel: u8) -> Frame {
        frame(&[SBRICK_CMD_BRAKE, channel])
    }
}

/// Powered Up encoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoweredUp;

const PU_MSG_PORT_OUTPUT: u8 = 0x81;
const PU_STARTUP_EXECUTE_IMMEDIATELY: u8 = 0x11;
const PU_WRITE_DIRECT_MODE_DATA: u8 = 0x51;
const PU_BRAKE_POWER: i8 = 127;

impl PoweredUp {
    fn power_frame(port: u8, power: i8) -> Frame {
        let [power] = power.to_le_bytes();
        frame(&[
            0x08,
            0x00,
            PU_MSG_PORT_OUTPUT,
            port,
            PU_STARTUP_EXECUTE_IMMEDIATELY,
            PU_WRITE_DIRECT_MODE_DATA,
            0x00,
            power,
        ])
    }
}

impl HubProtocol for PoweredUp {
    fn channel_count(&self) -> u8 {
        2
    }

    fn min_speed(&self) -> i16 {
        -100
    }

    fn max_speed(&self) -> i16 {
        100
    }

    fn watchdog_frame(&self, _timeout_tenths: u8) -> Option<Frame> {
        None
    }

    fn drive_frame(&self, channel: u8, speed: i16) -> Frame {
        let speed = speed.clamp(self.min_speed(), self.max_speed());
        let power = i8::try_from(speed).unwrap_or(0);
        Self::power_frame(channel, power)
    }

    fn brake_frame(&self, channel: u8) -> Frame {
        Self::power_frame(channel, PU_BRAKE_POWER)
    }
}

fn frame(bytes: &[u8]) -> Frame {
    // Every frame above is at most 8 bytes.
    Frame::from_slice(bytes).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sbrick_drive_forward() {
        let f = SBrick.drive_frame(2, 200);
        assert_eq!(f.as_slice(), &[0x01, 2, 0, 200]);
    }

    #[test]
    fn sbrick_drive_backward() {
        let f = SBrick.drive_frame(0, -255);
        assert_eq!(f.as_slice(), &[0x01, 0, 1, 255]);
    }

    #[test]
    fn sbrick_drive_clamps() {
        let f = SBrick.drive_frame(1, 1000);
        assert_eq!(f.as_slice(), &[0x01, 1, 0, 255]);
    }

    #[test]
    fn sbrick_brake_and_watchdog() {
        assert_eq!(SBrick.brake_frame(3).as_slice(), &[0x00, 3]);
        assert_eq!(SBrick.watchdog_frame(5).unwrap().as_slice(), &[0x0D, 5]);
        assert_eq!(SBrick.watchdog_frame(0).unwrap().as_slice(), &[0x0D, 0]);
    }

    #[test]
    fn pu_drive_signed_power() {
        let f = PoweredUp.drive_frame(1, -40);
        assert_eq!(f.as_slice(), &[0x08, 0x00, 0x81, 1, 0x11, 0x51, 0x00, 0xD8]);
    }

    #[test]
    fn pu_brake_and_no_watchdog() {
        let f = PoweredUp.brake_frame(0);
        assert_eq!(f.as_slice(), &[0x08, 0x00, 0x81, 0, 0x11, 0x51, 0x00, 127]);
        assert!(PoweredUp.watchdog_frame(5).is_none());
    }

    #[test]
    fn kind_selects_protocol() {
        assert_eq!(HubKind::SBrick.protocol().channel_count(), 4);
        assert_eq!(HubKind::PoweredUp.protocol().max_speed(), 100);
    }

    #[test]
    fn kind_serde_names() {
        let kind: HubKind = serde_json::from_str("\"SBrick\"").unwrap();
        assert_eq!(kind, HubKind::SBrick);
        let kind: HubKind = serde_json::from_str("\"PU\"").unwrap();
        assert_eq!(kind, HubKind::PoweredUp);
        let kind: HubKind = serde_json::from_str("\"pu\"").unwrap();
        assert_eq!(kind, HubKind::PoweredUp);
    }
}
