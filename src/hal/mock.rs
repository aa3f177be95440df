//! Mock implementations for testing without BLE hardware.
//!
//! This module provides test doubles for the transport, host and bus
//! traits, so the whole controller runs on a desktop without hubs, a
//! broker or real time.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockTransport`] | [`HubTransport`] | Simulated peripherals, recorded frames, injected failures |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//! | [`MockDelay`] | [`Delay`] | Records delays, optionally advances a [`MockClock`] |
//! | [`MockHost`] | [`HostController`] | Records host pin actions |
//! | [`MockMqtt`] | [`MqttClient`] | Records subscriptions, injects messages |
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use rs_trainz_ble::hal::MockTransport;
//! use rs_trainz_ble::hub::HubKind;
//! use rs_trainz_ble::traits::HubTransport;
//!
//! let transport = MockTransport::new();
//! let handle = transport.add_peripheral("00:07:80:d0:47:43");
//!
//! let seen = transport.scan(Duration::from_millis(10)).unwrap();
//! assert_eq!(seen.len(), 1);
//!
//! transport.connect(handle, HubKind::SBrick).unwrap();
//! transport.write(handle, &[0x0D, 5]).unwrap();
//! assert_eq!(transport.writes_to(handle), vec![vec![0x0D, 5]]);
//! ```
//!
//! [`HubTransport`]: crate::traits::HubTransport
//! [`Clock`]: crate::traits::Clock
//! [`Delay`]: crate::traits::Delay
//! [`HostController`]: crate::traits::HostController
//! [`MqttClient`]: crate::traits::MqttClient

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::TransportError;
use crate::events::Action;
use crate::hub::HubKind;
use crate::traits::{
    Advertisement, Clock, Delay, HostController, HubTransport, MqttClient, MqttMessage,
    TransportHandle,
};

// ============================================================================
// Transport Mock
// ============================================================================

#[derive(Debug)]
struct MockPeripheral {
    address: String,
    handle: TransportHandle,
    advertising: bool,
    connected: bool,
    kind: Option<HubKind>,
    failing_connects: u32,
    failing_writes: bool,
}

#[derive(Debug, Default)]
struct TransportLog {
    peripherals: Vec<MockPeripheral>,
    writes: Vec<(TransportHandle, Vec<u8>)>,
    scans: usize,
    connect_attempts: usize,
    next_handle: u64,
    scan_error: Option<TransportError>,
    scan_delay: Duration,
}

impl TransportLog {
    fn by_handle(&mut self, handle: TransportHandle) -> Result<&mut MockPeripheral, TransportError> {
        self.peripherals
            .iter_mut()
            .find(|p| p.handle == handle)
            .ok_or(TransportError::UnknownHandle(handle.0))
    }

    fn by_address(&mut self, address: &str) -> Option<&mut MockPeripheral> {
        self.peripherals
            .iter_mut()
            .find(|p| p.address.eq_ignore_ascii_case(address))
    }
}

/// Simulated BLE link layer.
///
/// Peripherals advertise until they are connected and again after their
/// link drops. Every written frame is recorded with its handle.
#[derive(Debug, Default)]
pub struct MockTransport {
    log: Mutex<TransportLog>,
}

impl MockTransport {
    /// Creates a transport with no peripherals.
    pub fn new() -> Self {
        Self::default()
    }

    fn log(&self) -> MutexGuard<'_, TransportLog> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add an advertising peripheral and return its handle.
    pub fn add_peripheral(&self, address: &str) -> TransportHandle {
        let mut log = self.log();
        log.next_handle += 1;
        let handle = TransportHandle(log.next_handle);
        log.peripherals.push(MockPeripheral {
            address: address.to_owned(),
            handle,
            advertising: true,
            connected: false,
            kind: None,
            failing_connects: 0,
            failing_writes: false,
        });
        handle
    }

    /// Handle of a known peripheral.
    pub fn handle_of(&self, address: &str) -> Option<TransportHandle> {
        self.log().by_address(address).map(|p| p.handle)
    }

    /// Start or stop advertising (peripheral out of range or powered off).
    pub fn set_advertising(&self, address: &str, advertising: bool) {
        if let Some(p) = self.log().by_address(address) {
            p.advertising = advertising;
        }
    }

    /// Make the next `count` connect attempts to `handle` fail.
    pub fn fail_connects(&self, handle: TransportHandle, count: u32) {
        if let Ok(p) = self.log().by_handle(handle) {
            p.failing_connects = count;
        }
    }

    /// Make every write to the peripheral fail.
    pub fn fail_writes(&self, address: &str) {
        if let Some(p) = self.log().by_address(address) {
            p.failing_writes = true;
        }
    }

    /// Drop the link to the peripheral, as if it went out of range.
    pub fn drop_link(&self, address: &str) {
        if let Some(p) = self.log().by_address(address) {
            p.connected = false;
        }
    }

    /// Make the next scan fail.
    pub fn fail_next_scan(&self, error: TransportError) {
        self.log().scan_error = Some(error);
    }

    /// Make every scan block for `delay`.
    pub fn set_scan_delay(&self, delay: Duration) {
        self.log().scan_delay = delay;
    }

    /// Number of scans performed.
    pub fn scan_count(&self) -> usize {
        self.log().scans
    }

    /// Number of connect attempts.
    pub fn connect_attempts(&self) -> usize {
        self.log().connect_attempts
    }

    /// Hub type the peripheral was last connected as.
    pub fn connected_kind(&self, address: &str) -> Option<HubKind> {
        self.log().by_address(address).and_then(|p| p.kind)
    }

    /// All recorded writes, in order.
    pub fn writes(&self) -> Vec<(TransportHandle, Vec<u8>)> {
        self.log().writes.clone()
    }

    /// Recorded frames written to one peripheral, in order.
    pub fn writes_to(&self, handle: TransportHandle) -> Vec<Vec<u8>> {
        self.log()
            .writes
            .iter()
            .filter(|(h, _)| *h == handle)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    /// Number of recorded writes.
    pub fn write_count(&self) -> usize {
        self.log().writes.len()
    }

    /// Forget recorded writes.
    pub fn clear_writes(&self) {
        self.log().writes.clear();
    }
}

impl HubTransport for MockTransport {
    fn scan(&self, _duration: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let delay = {
            let mut log = self.log();
            log.scans += 1;
            if let Some(error) = log.scan_error.take() {
                return Err(error);
            }
            log.scan_delay
        };

        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        Ok(self
            .log()
            .peripherals
            .iter()
            .filter(|p| p.advertising && !p.connected)
            .map(|p| Advertisement::new(p.address.clone(), p.handle))
            .collect())
    }

    fn connect(&self, handle: TransportHandle, kind: HubKind) -> Result<(), TransportError> {
        let mut log = self.log();
        log.connect_attempts += 1;
        let p = log.by_handle(handle)?;
        if p.failing_connects > 0 {
            p.failing_connects -= 1;
            return Err(TransportError::ConnectionFailed(p.address.clone()));
        }
        p.connected = true;
        p.kind = Some(kind);
        Ok(())
    }

    fn write(&self, handle: TransportHandle, frame: &[u8]) -> Result<(), TransportError> {
        let mut log = self.log();
        let p = log.by_handle(handle)?;
        if !p.connected {
            return Err(TransportError::NotConnected);
        }
        if p.failing_writes {
            return Err(TransportError::WriteFailed(p.address.clone()));
        }
        log.writes.push((handle, frame.to_vec()));
        Ok(())
    }

    fn is_connected(&self, handle: TransportHandle) -> bool {
        self.log().by_handle(handle).map_or(false, |p| p.connected)
    }

    fn disconnect(&self, handle: TransportHandle) -> Result<(), TransportError> {
        self.log().by_handle(handle)?.connected = false;
        Ok(())
    }
}

// ============================================================================
// Time Mocks
// ============================================================================

/// Mock clock for testing.
///
/// Shared between the control loop and hubs, so it is advanced through
/// `&self`.
///
/// # Example
///
/// ```rust
/// use rs_trainz_ble::hal::MockClock;
/// use rs_trainz_ble::traits::Clock;
///
/// let clock = MockClock::new();
/// clock.set(1000);
/// clock.advance(500);
/// assert_eq!(clock.now_ms(), 1500);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    current_ms: AtomicU64,
}

impl MockClock {
    /// Creates a new mock clock starting at 0ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the current time in milliseconds.
    pub fn set(&self, ms: u64) {
        self.current_ms.store(ms, Ordering::SeqCst);
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, ms: u64) {
        self.current_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.current_ms.load(Ordering::SeqCst)
    }
}

/// Mock delay that returns immediately.
///
/// Records every requested delay. When built with [`MockDelay::with_clock`]
/// it also advances that clock, so time-based behaviour still progresses.
#[derive(Debug, Default)]
pub struct MockDelay {
    /// Requested delays in milliseconds, in order.
    pub delays: Vec<u32>,
    clock: Option<Arc<MockClock>>,
}

impl MockDelay {
    /// Creates a delay that only records.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a delay that advances `clock`.
    pub fn with_clock(clock: Arc<MockClock>) -> Self {
        Self {
            delays: Vec::new(),
            clock: Some(clock),
        }
    }

    /// Sum of all requested delays.
    pub fn total_ms(&self) -> u64 {
        self.delays.iter().map(|&d| u64::from(d)).sum()
    }
}

impl Delay for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.delays.push(ms);
        if let Some(clock) = &self.clock {
            clock.advance(u64::from(ms));
        }
    }
}

// ============================================================================
// Host Mock
// ============================================================================

/// Mock host pin controller.
#[derive(Debug, Default)]
pub struct MockHost {
    /// Actions executed, in order.
    pub executed: Vec<Action>,
    /// Fail every action when set.
    pub failing: bool,
}

impl MockHost {
    /// Creates a host that accepts every action.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostController for MockHost {
    type Error = ();

    fn execute(&mut self, action: &Action) -> Result<(), ()> {
        if self.failing {
            return Err(());
        }
        self.executed.push(action.clone());
        Ok(())
    }
}

// ============================================================================
// Network Mocks
// ============================================================================

/// Mock MQTT client for testing.
///
/// Records subscriptions and allows injecting incoming messages.
///
/// # Example
///
/// ```rust
/// use rs_trainz_ble::hal::MockMqtt;
/// use rs_trainz_ble::traits::MqttClient;
///
/// let mut mqtt = MockMqtt::new();
/// mqtt.queue_message("trains/command", br#"{"cmd":"blink","loco":3,"duration_ms":500}"#);
///
/// mqtt.subscribe("trains/command").unwrap();
/// assert!(mqtt.is_subscribed("trains/command"));
/// assert!(mqtt.try_recv().is_some());
/// assert!(mqtt.try_recv().is_none());
/// ```
#[derive(Debug, Default)]
pub struct MockMqtt {
    /// Topics that have been subscribed to.
    pub subscriptions: Vec<String>,
    /// Queue of incoming messages returned by `try_recv()`, oldest first.
    pub incoming: Vec<MqttMessage>,
    /// Whether the client is connected.
    pub connected: bool,
}

impl MockMqtt {
    /// Creates a new mock MQTT client in connected state.
    pub fn new() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    /// Queue an incoming message
    pub fn queue_message(&mut self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        self.incoming.push(MqttMessage::new(topic, payload));
    }

    /// Check if a topic was subscribed to
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.iter().any(|t| t == topic)
    }
}

impl MqttClient for MockMqtt {
    type Error = ();

    fn subscribe(&mut self, topic: &str) -> Result<(), ()> {
        if !self.connected {
            return Err(());
        }
        self.subscriptions.push(topic.into());
        Ok(())
    }

    fn try_recv(&mut self) -> Option<MqttMessage> {
        if self.incoming.is_empty() {
            None
        } else {
            Some(self.incoming.remove(0))
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "00:07:80:d0:47:43";

    #[test]
    fn transport_connected_peripherals_stop_advertising() {
        let transport = MockTransport::new();
        let handle = transport.add_peripheral(ADDR);
        transport.connect(handle, HubKind::PoweredUp).unwrap();

        assert!(transport.scan(Duration::ZERO).unwrap().is_empty());
        assert_eq!(transport.connected_kind(ADDR), Some(HubKind::PoweredUp));

        transport.drop_link(ADDR);
        assert!(!transport.is_connected(handle));
        assert_eq!(transport.scan(Duration::ZERO).unwrap().len(), 1);
        assert_eq!(transport.scan_count(), 2);
    }

    #[test]
    fn transport_hidden_peripheral() {
        let transport = MockTransport::new();
        transport.add_peripheral(ADDR);
        transport.set_advertising(ADDR, false);
        assert!(transport.scan(Duration::ZERO).unwrap().is_empty());
    }

    #[test]
    fn transport_scan_error_once() {
        let transport = MockTransport::new();
        transport.fail_next_scan(TransportError::ScanFailed("radio off".into()));
        assert!(transport.scan(Duration::ZERO).is_err());
        assert!(transport.scan(Duration::ZERO).is_ok());
    }

    #[test]
    fn transport_write_requires_connection() {
        let transport = MockTransport::new();
        let handle = transport.add_peripheral(ADDR);
        assert_eq!(
            transport.write(handle, &[1]),
            Err(TransportError::NotConnected)
        );
        assert_eq!(
            transport.write(TransportHandle(99), &[1]),
            Err(TransportError::UnknownHandle(99))
        );
    }

    #[test]
    fn transport_connect_failures_count_down() {
        let transport = MockTransport::new();
        let handle = transport.add_peripheral(ADDR);
        transport.fail_connects(handle, 2);
        assert!(transport.connect(handle, HubKind::SBrick).is_err());
        assert!(transport.connect(handle, HubKind::SBrick).is_err());
        assert!(transport.connect(handle, HubKind::SBrick).is_ok());
        assert_eq!(transport.connect_attempts(), 3);
    }

    #[test]
    fn transport_failing_writes() {
        let transport = MockTransport::new();
        let handle = transport.add_peripheral(ADDR);
        transport.connect(handle, HubKind::SBrick).unwrap();
        transport.fail_writes(ADDR);
        assert!(matches!(
            transport.write(handle, &[0]),
            Err(TransportError::WriteFailed(_))
        ));
        assert_eq!(transport.write_count(), 0);
    }

    #[test]
    fn mock_clock_advance() {
        let clock = MockClock::new();
        clock.advance(500);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 750);
    }

    #[test]
    fn mock_delay_advances_clock() {
        let clock = Arc::new(MockClock::new());
        let mut delay = MockDelay::with_clock(clock.clone());
        delay.delay_ms(250);
        delay.delay_ms(250);
        assert_eq!(delay.delays, vec![250, 250]);
        assert_eq!(delay.total_ms(), 500);
        assert_eq!(clock.now_ms(), 500);
    }

    #[test]
    fn mock_host_records() {
        let mut host = MockHost::new();
        host.execute(&Action::host_pin(4, 100)).unwrap();
        assert_eq!(host.executed, vec![Action::host_pin(4, 100)]);

        host.failing = true;
        assert!(host.execute(&Action::host_pin(4, 0)).is_err());
        assert_eq!(host.executed.len(), 1);
    }

    #[test]
    fn mock_mqtt_fifo() {
        let mut mqtt = MockMqtt::new();
        mqtt.queue_message("a", b"1".to_vec());
        mqtt.queue_message("b", b"2".to_vec());
        assert_eq!(mqtt.try_recv().unwrap().topic, "a");
        assert_eq!(mqtt.try_recv().unwrap().topic, "b");
        assert!(mqtt.try_recv().is_none());
    }

    #[test]
    fn mock_mqtt_disconnected_rejects() {
        let mut mqtt = MockMqtt::new();
        mqtt.connected = false;
        assert!(mqtt.subscribe("trains/command").is_err());
        assert!(!mqtt.is_connected());
    }
}
