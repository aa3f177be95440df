//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`].
//!
//! # Available Implementations
//!
//! - `mock`: Test implementations for desktop development
//! - [`SystemClock`], [`StdDelay`], [`LoggingHost`]: std implementations
//!   used by the controller binary
//! - `btle`: BLE transport on top of btleplug (requires `ble` feature)

pub mod mock;

#[cfg(feature = "ble")]
pub mod btle;

pub use mock::*;

#[cfg(feature = "ble")]
pub use btle::BtleTransport;

use std::convert::Infallible;
use std::time::{Duration, Instant};

use tracing::info;

use crate::events::{Action, ChannelRef};
use crate::traits::{Clock, Delay, HostController};

/// Monotonic clock counting from its creation.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    /// Creates a clock reading 0 now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Blocking delay on the current thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Host controller for machines without output pins.
///
/// Logs every host pin action and reports success.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHost;

impl HostController for LoggingHost {
    type Error = Infallible;

    fn execute(&mut self, action: &Action) -> Result<(), Infallible> {
        if let ChannelRef::HostPin { pin } = action.channel {
            info!(pin, power = action.clamped_power(), "host pin action");
        }
        Ok(())
    }
}
