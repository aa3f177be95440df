//! BLE hub transport abstraction.
//!
//! The link layer (scan, connect, GATT writes) is consumed as a
//! capability. Protocol knowledge stays in [`crate::hub::protocol`]; a
//! transport only moves opaque frames to the right characteristic.
//!
//! | Operation | Purpose |
//! |-----------|---------|
//! | [`scan`](HubTransport::scan) | One bounded scan pass |
//! | [`connect`](HubTransport::connect) | Connect with a finite timeout |
//! | [`write`](HubTransport::write) | Send a protocol frame |
//! | [`is_connected`](HubTransport::is_connected) | Link liveness (disconnect notification) |
//!
//! Implementations: [`MockTransport`](crate::hal::MockTransport) for tests
//! and `BtleTransport` behind the `ble` feature.

use std::time::Duration;

use crate::error::TransportError;
use crate::hub::HubKind;

/// Opaque token a transport hands out for a scanned peripheral.
///
/// Stored by the hub after discovery and passed back on connect/write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportHandle(pub u64);

/// One scan result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertised hardware address, e.g. `00:07:80:D0:47:43`.
    pub address: String,
    /// Handle to use for connecting.
    pub handle: TransportHandle,
}

impl Advertisement {
    /// Create a new advertisement.
    pub fn new(address: impl Into<String>, handle: TransportHandle) -> Self {
        Self {
            address: address.into(),
            handle,
        }
    }

    /// Whether this advertisement belongs to the given hub address.
    ///
    /// BLE addresses are hex, so the comparison ignores case.
    pub fn matches(&self, address: &str) -> bool {
        self.address.eq_ignore_ascii_case(address)
    }
}

/// Link-layer capability for talking to BLE hubs.
///
/// Shared by the control loop and all ramp workers, so every method takes
/// `&self`. Every call must return in bounded time.
pub trait HubTransport: Send + Sync {
    /// Scan for `duration` and return everything seen.
    fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, TransportError>;

    /// Connect to a scanned peripheral of the given hub type.
    fn connect(&self, handle: TransportHandle, kind: HubKind) -> Result<(), TransportError>;

    /// Write one protocol frame to a connected hub.
    fn write(&self, handle: TransportHandle, frame: &[u8]) -> Result<(), TransportError>;

    /// Whether the link to the hub is still up.
    fn is_connected(&self, handle: TransportHandle) -> bool;

    /// Drop the link to the hub.
    fn disconnect(&self, handle: TransportHandle) -> Result<(), TransportError>;
}
