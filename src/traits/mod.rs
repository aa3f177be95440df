//! Trait definitions for the hub transport, host hardware and command bus.
//!
//! These abstractions let the controller:
//! - Run against real BLE hubs or the mock transport
//! - Take commands from any MQTT client implementation
//! - Be tested without sleeping or real time
//!
//! # Submodules
//!
//! - `transport`: BLE scan/connect/write capability ([`HubTransport`])
//! - `hardware`: [`Clock`], [`Delay`], [`HostController`], [`Direction`]
//! - `network`: [`MqttClient`] and [`MqttMessage`]

pub mod hardware;
pub mod network;
pub mod transport;

pub use hardware::*;
pub use network::*;
pub use transport::*;
