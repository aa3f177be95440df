//! Command-bus polling for any [`MqttClient`].
//!
//! Platform-agnostic: works with a blocking client on a worker thread, the
//! mock client in tests, or anything else implementing the trait. Messages
//! on the command topic are copied into the ingress queue; everything
//! else is ignored.
//!
//! # Example
//!
//! ```rust
//! use rs_trainz_ble::config::MqttConfig;
//! use rs_trainz_ble::hal::MockMqtt;
//! use rs_trainz_ble::ingress::command_queue;
//! use rs_trainz_ble::services::MqttIngressRunner;
//!
//! let (tx, rx) = command_queue(8);
//! let mut runner = MqttIngressRunner::new(MockMqtt::new(), tx, &MqttConfig::default());
//! runner.subscribe().unwrap();
//!
//! runner.client_mut().queue_message("trains/command", br#"{"cmd":"emergency_brake"}"#.to_vec());
//! assert_eq!(runner.poll(), 1);
//! assert_eq!(rx.drain().len(), 1);
//! ```

use tracing::{debug, info};

use crate::config::{LongString, MqttConfig};
use crate::ingress::IngressSender;
use crate::traits::MqttClient;

// ============================================================================
// MQTT Ingress Runner
// ============================================================================

/// Forwards command-topic messages from an [`MqttClient`] to the ingress
/// queue.
pub struct MqttIngressRunner<C: MqttClient> {
    client: C,
    sender: IngressSender,
    command_topic: LongString,
}

impl<C: MqttClient> MqttIngressRunner<C> {
    /// Create a runner for the configured command topic.
    pub fn new(client: C, sender: IngressSender, config: &MqttConfig) -> Self {
        Self {
            client,
            sender,
            command_topic: config.command_topic(),
        }
    }

    /// Get a reference to the MQTT client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Get a mutable reference to the MQTT client.
    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Topic the runner forwards.
    pub fn command_topic(&self) -> &str {
        self.command_topic.as_str()
    }

    /// Subscribe to the command topic.
    pub fn subscribe(&mut self) -> Result<(), C::Error> {
        self.client.subscribe(self.command_topic.as_str())?;
        info!(topic = %self.command_topic, "subscribed to command topic");
        Ok(())
    }

    /// Forward every pending message. Returns how many were queued.
    ///
    /// Never blocks; messages the queue has no room for are dropped by
    /// the sender. Nothing is read while the client is disconnected.
    pub fn poll(&mut self) -> usize {
        if !self.client.is_connected() {
            debug!("MQTT client disconnected, skipping poll");
            return 0;
        }

        let mut queued = 0;
        while let Some(msg) = self.client.try_recv() {
            if msg.topic != self.command_topic.as_str() {
                debug!(topic = %msg.topic, "ignoring message on foreign topic");
                continue;
            }
            if self.sender.submit_message(msg) {
                queued += 1;
            }
        }
        queued
    }
}
