//! Error types for the controller.
//!
//! None of these are fatal to the control loop. Transport and discovery
//! errors are retried on the next cycle, command errors discard a single
//! message, and configuration errors are reported once at startup.

use thiserror::Error;

/// Errors reported by a [`HubTransport`](crate::traits::HubTransport).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The BLE adapter could not be initialised or is missing.
    #[error("BLE adapter not available: {0}")]
    AdapterNotAvailable(String),

    /// Scanning failed.
    #[error("scan failed: {0}")]
    ScanFailed(String),

    /// Connecting to a hub failed.
    #[error("failed to connect to hub: {0}")]
    ConnectionFailed(String),

    /// The connect attempt did not finish in time.
    #[error("connection timeout")]
    ConnectionTimeout,

    /// The handle does not refer to a known peripheral.
    #[error("unknown transport handle {0}")]
    UnknownHandle(u64),

    /// The hub does not expose the expected GATT characteristic.
    #[error("characteristic not found: {0}")]
    CharacteristicNotFound(String),

    /// Writing a frame to the hub failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The hub is not connected.
    #[error("hub not connected")]
    NotConnected,
}

/// Errors reported by the [`DiscoveryScanner`](crate::discovery::DiscoveryScanner).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// Another scan is already running.
    #[error("a scan is already in progress")]
    ScanInProgress,

    /// The transport failed to scan.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors produced while parsing a command-bus payload.
#[derive(Error, Debug)]
pub enum CommandError {
    /// The payload is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// The payload is not a recognised command.
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors found while loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid JSON for [`Config`](crate::config::Config).
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two locomotives share an address.
    #[error("duplicate locomotive address {0}")]
    DuplicateLoco(u32),

    /// A locomotive has no hubs.
    #[error("locomotive {loco} has no hubs")]
    NoHubs {
        /// Locomotive address.
        loco: u32,
    },

    /// A hub channel index is outside the range of its hub type.
    #[error("hub {hub} has no channel {channel}")]
    InvalidChannel {
        /// Hub address.
        hub: String,
        /// Offending channel index.
        channel: u8,
    },

    /// An action refers to a hub that is not part of the locomotive.
    #[error("locomotive {loco} has an action for unknown hub {hub}")]
    UnknownActionHub {
        /// Locomotive address.
        loco: u32,
        /// Hub address referenced by the action.
        hub: String,
    },

    /// A queue length of zero would drop every command.
    #[error("command queue length must be at least 1")]
    ZeroQueueLength,
}

/// Errors from the MQTT command subscriber.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MqttError {
    /// Failed to start the client runtime.
    #[error("failed to start MQTT client: {0}")]
    Connect(String),

    /// Failed to subscribe to the command topic.
    #[error("failed to subscribe: {0}")]
    Subscribe(String),
}
