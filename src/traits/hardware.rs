//! Host-side abstractions: direction, time, delays and host pin outputs.
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`Clock`] | Monotonic millisecond time source |
//! | [`Delay`] | Blocking delay used by the control loop |
//! | [`HostController`] | Executes actions bound to the controller's own pins |
//!
//! Test doubles live in [`crate::hal::mock`]; std implementations in
//! [`crate::hal`].

use crate::events::Action;

/// Direction of locomotive travel.
///
/// Also the value carried by `dirchanged` triggers, which is why the
/// string forms are `forward`, `backward` and `stopped`.
///
/// # Default
///
/// Defaults to [`Stopped`](Self::Stopped).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Moving forward (positive speed).
    Forward,
    /// Moving backward (negative speed).
    Backward,
    /// Not moving.
    #[default]
    Stopped,
}

impl Direction {
    /// Returns the direction as a lowercase string.
    ///
    /// # Examples
    ///
    /// ```
    /// use rs_trainz_ble::Direction;
    ///
    /// assert_eq!(Direction::Forward.as_str(), "forward");
    /// assert_eq!(Direction::Backward.as_str(), "backward");
    /// assert_eq!(Direction::Stopped.as_str(), "stopped");
    /// ```
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Stopped => "stopped",
        }
    }

    /// Direction implied by a signed speed or power value.
    ///
    /// ```
    /// use rs_trainz_ble::Direction;
    ///
    /// assert_eq!(Direction::of(40), Direction::Forward);
    /// assert_eq!(Direction::of(-1), Direction::Backward);
    /// assert_eq!(Direction::of(0), Direction::Stopped);
    /// ```
    #[inline]
    pub const fn of(value: i16) -> Self {
        if value > 0 {
            Direction::Forward
        } else if value < 0 {
            Direction::Backward
        } else {
            Direction::Stopped
        }
    }

    /// Parse direction from text input.
    ///
    /// Accepts full names, abbreviations and `1`/`-1`/`0`. Input is trimmed
    /// and case-insensitive. `reverse` is accepted as a synonym of
    /// `backward`.
    ///
    /// ```
    /// use rs_trainz_ble::Direction;
    ///
    /// assert_eq!(Direction::from_text("fwd"), Some(Direction::Forward));
    /// assert_eq!(Direction::from_text(" Reverse "), Some(Direction::Backward));
    /// assert_eq!(Direction::from_text("0"), Some(Direction::Stopped));
    /// assert_eq!(Direction::from_text("sideways"), None);
    /// ```
    pub fn from_text(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "fwd" | "1" => Some(Direction::Forward),
            "backward" | "bwd" | "reverse" | "rev" | "-1" => Some(Direction::Backward),
            "stopped" | "stop" | "0" => Some(Direction::Stopped),
            _ => None,
        }
    }
}

/// Time source in milliseconds.
///
/// Shared between the control loop and every ramp worker, so it takes
/// `&self` and must be `Send + Sync`.
///
/// ```rust
/// use rs_trainz_ble::traits::Clock;
/// use rs_trainz_ble::hal::MockClock;
///
/// let clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(100);
/// assert_eq!(clock.now_ms(), 100);
/// ```
pub trait Clock: Send + Sync {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}

/// Blocking delay.
///
/// The control loop is synchronous; it waits between cycles and during
/// the connect handshake through this trait so tests can run instantly.
pub trait Delay {
    /// Block for the given number of milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// Executes actions that target the controller's own output pins.
///
/// Hub channel actions are handled by the owning [`Hub`](crate::hub::Hub);
/// everything bound to a host pin ends up here.
pub trait HostController {
    /// Error type for pin operations.
    type Error: core::fmt::Debug;

    /// Apply an action to a host pin.
    fn execute(&mut self, action: &Action) -> Result<(), Self::Error>;
}
