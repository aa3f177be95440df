//! MQTT command subscriber on rumqttc.
//!
//! Subscribes to `<prefix>/command` and hands every message on it to the
//! ingress queue. The event loop never waits for the control loop: when
//! the queue is full the message is dropped and counted there.
//!
//! The controller core is synchronous, so [`MqttSubscriber::spawn`] runs
//! the subscriber on its own thread with a single-threaded tokio runtime.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::MqttError;
use crate::ingress::IngressSender;

/// Delay before polling again after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Bridges the broker's command topic into the ingress queue.
pub struct MqttSubscriber {
    config: MqttConfig,
    command_topic: String,
    sender: IngressSender,
}

impl MqttSubscriber {
    /// Create a subscriber for the configured broker and prefix.
    pub fn new(config: &MqttConfig, sender: IngressSender) -> Self {
        Self {
            config: config.clone(),
            command_topic: config.command_topic().as_str().to_owned(),
            sender,
        }
    }

    /// Topic the subscriber forwards.
    pub fn command_topic(&self) -> &str {
        &self.command_topic
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.as_str(),
            self.config.host.as_str(),
            self.config.port,
        );
        options.set_keep_alive(Duration::from_secs(u64::from(self.config.keep_alive_secs)));
        if self.config.has_auth() {
            options.set_credentials(self.config.username.as_str(), self.config.password.as_str());
        }
        options
    }

    /// Queue a received publish if it is on the command topic.
    fn handle_publish(&self, topic: &str, payload: &[u8]) -> bool {
        if topic != self.command_topic {
            debug!(topic, "ignoring message on foreign topic");
            return false;
        }
        self.sender.submit(topic, payload)
    }

    /// Run the MQTT event loop until the task is dropped.
    pub async fn run(self) -> Result<(), MqttError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 10);

        client
            .subscribe(self.command_topic.as_str(), QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::Subscribe(e.to_string()))?;

        info!(
            host = %self.config.host,
            port = self.config.port,
            topic = %self.command_topic,
            "MQTT subscriber started"
        );

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.handle_publish(&publish.topic, &publish.payload);
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("MQTT connected");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection error, retrying");
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    /// Run the subscriber on a dedicated thread.
    pub fn spawn(self) -> Result<JoinHandle<()>, MqttError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| MqttError::Connect(e.to_string()))?;

        thread::Builder::new()
            .name("mqtt".into())
            .spawn(move || {
                if let Err(e) = runtime.block_on(self.run()) {
                    warn!(error = %e, "MQTT subscriber stopped");
                }
            })
            .map_err(|e| MqttError::Connect(e.to_string()))
    }
}
