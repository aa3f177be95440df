//! Command-bus abstraction.
//!
//! Layout commands arrive over MQTT. The controller only consumes them, so
//! the trait is small: subscribe to the command topic and poll for
//! messages without blocking.
//!
//! ```text
//! trains/command   - JSON command for one or all locomotives
//! ```

/// MQTT client trait for the command bus.
///
/// Sync-first: `try_recv` never blocks, so the same polling code works for
/// a blocking client on a worker thread and for tests.
///
/// # Example
///
/// ```rust,ignore
/// use rs_trainz_ble::traits::MqttClient;
///
/// fn listen<M: MqttClient>(client: &mut M) {
///     client.subscribe("trains/command").unwrap();
///     while let Some(msg) = client.try_recv() {
///         println!("{}", msg.topic);
///     }
/// }
/// ```
pub trait MqttClient {
    /// Error type for MQTT operations.
    type Error: core::fmt::Debug;

    /// Subscribe to a topic.
    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Try to receive the next message (non-blocking).
    fn try_recv(&mut self) -> Option<MqttMessage>;

    /// Check if connected to broker.
    fn is_connected(&self) -> bool;
}

/// A message received from the command bus.
///
/// This is also the owned buffer that travels through the
/// [`ingress`](crate::ingress) queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MqttMessage {
    /// Topic the message was published to.
    pub topic: String,
    /// Message payload as raw bytes.
    pub payload: Vec<u8>,
}

impl MqttMessage {
    /// Create a new MQTT message.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Returns the payload as a UTF-8 string, if valid.
    pub fn payload_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.payload).ok()
    }
}
