//! # rs-trainz-ble
//!
//! A BLE locomotive controller that bridges layout commands from an MQTT
//! command bus to SBrick and LEGO Powered Up hubs.
//!
//! ## Features
//!
//! - **Hub protocols**: SBrick and Powered Up frame encoding behind one trait
//! - **Smooth speed changes**: per-channel ramping toward target speeds on a
//!   background worker per hub
//! - **Connection lifecycle**: discovery, connect, handshake and link-loss
//!   handling for every hub
//! - **Event triggers**: configured actions on hub channels or host pins,
//!   fired by direction changes or bus triggers
//! - **Non-blocking ingress**: a bounded command queue that drops rather than
//!   stalls the bus client
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without radios:
//!
//! - `traits` - Transport, clock, host and command-bus abstractions
//! - `hub` - Hub state machine, protocols and ramp workers
//! - `locomotive` - Hubs grouped into one logical locomotive
//! - `controller` - The control loop that owns all locomotives
//! - `hal` - Concrete implementations (mock for testing, btleplug for hardware)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_trainz_ble::{
//!     channel::ChannelConfig,
//!     config::{HubConfig, LocoConfig, RampConfig},
//!     hal::{MockClock, MockTransport},
//!     hub::HubKind,
//!     Locomotive,
//! };
//!
//! let transport = Arc::new(MockTransport::new());
//! let config = LocoConfig::new(3, "BR 218")
//!     .with_hub(HubConfig::new("00:07:80:d0:47:43", HubKind::SBrick).with_channel(ChannelConfig::motor(0)));
//! let loco = Locomotive::new(&config, RampConfig::default(), transport, Arc::new(MockClock::new()));
//!
//! // Commands are ignored until every hub of the locomotive is connected
//! assert!(!loco.all_hubs_connected());
//! assert!(loco.drive(0, 60).is_empty());
//!
//! // 50% power on an SBrick channel with no minimum speed
//! assert_eq!(rs_trainz_ble::hub::drive_speed(0, 50, 255, false), 127);
//! ```

#![warn(missing_docs)]

/// Per-channel speed governor with ramping.
pub mod channel;
/// Command-bus payloads and parsing.
pub mod commands;
/// Controller configuration loaded from JSON.
pub mod config;
/// Control loop and locomotive registry.
pub mod controller;
/// Batched BLE discovery.
pub mod discovery;
/// Error types.
pub mod error;
/// Event triggers and actions.
pub mod events;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// Hub connection state machine and protocols.
pub mod hub;
/// Bounded command queue between bus clients and the control loop.
pub mod ingress;
/// Locomotive aggregate over one or more hubs.
pub mod locomotive;
/// Command-bus services (MQTT).
pub mod services;
/// Core traits for transport, hardware and network abstraction.
pub mod traits;

// Re-exports for convenience
pub use channel::{AttachedDevice, ChannelConfig, HubChannel};
pub use commands::{parse_command, BusCommand};
pub use controller::{ControlLoop, CycleReport, LocoRegistry};
pub use discovery::DiscoveryScanner;
pub use error::{CommandError, ConfigError, DiscoveryError, MqttError, TransportError};
pub use events::{Action, ChannelRef, Event, Trigger, TriggerEvent, TriggerSource};
pub use hub::{Hub, HubKind, HubState, RampWorker};
pub use ingress::{command_queue, IngressReceiver, IngressSender};
pub use locomotive::Locomotive;
pub use traits::{
    // Hardware
    Clock,
    Delay,
    Direction,
    HostController,
    // Transport
    Advertisement,
    HubTransport,
    TransportHandle,
    // Network
    MqttClient,
    MqttMessage,
};

// Config re-exports
pub use config::{Config, ControllerConfig, HubConfig, LocoConfig, MqttConfig, RampConfig};
