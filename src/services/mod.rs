//! Command-bus services.
//!
//! - [`MqttIngressRunner`]: polls any [`MqttClient`](crate::traits::MqttClient)
//!   and feeds the ingress queue (always available)
//! - `MqttSubscriber`: rumqttc subscriber on its own thread (`mqtt` feature)
//!
//! Both only produce into the [`ingress`](crate::ingress) queue; the
//! control loop is the single consumer.

pub mod mqtt_runner;

#[cfg(feature = "mqtt")]
pub mod mqtt;

pub use mqtt_runner::*;

#[cfg(feature = "mqtt")]
pub use mqtt::*;
