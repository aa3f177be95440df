//! Background ramp thread, one per connected hub.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::Hub;

/// Runs [`Hub::tick_for`] periodically for the connection it was started
/// on.
///
/// The worker owns a clone of the hub handle and ends on its own after a
/// link loss or a deliberate disconnect, even if the hub has reconnected
/// by the time it wakes up; there is no stop signal.
#[derive(Debug)]
pub struct RampWorker {
    address: String,
    handle: JoinHandle<()>,
}

impl RampWorker {
    /// Spawn a named worker thread ticking every `tick_ms` milliseconds.
    ///
    /// Returns `None` if the thread could not be spawned.
    pub fn spawn(hub: Hub, tick_ms: u32) -> Option<Self> {
        let address = hub.address().to_owned();
        let epoch = hub.connection_epoch();
        let period = Duration::from_millis(u64::from(tick_ms.max(1)));

        let spawned = thread::Builder::new()
            .name(format!("ramp-{address}"))
            .spawn(move || {
                debug!(hub = %hub.address(), "ramp worker started");
                loop {
                    thread::sleep(period);
                    if !hub.tick_for(epoch) {
                        break;
                    }
                }
                debug!(hub = %hub.address(), "ramp worker stopped");
            });

        match spawned {
            Ok(handle) => Some(Self { address, handle }),
            Err(e) => {
                warn!(hub = %address, error = %e, "failed to spawn ramp worker");
                None
            }
        }
    }

    /// Address of the hub this worker ticks.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Whether the worker has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to exit.
    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!(hub = %self.address, "ramp worker panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Instant;

    use super::*;
    use crate::channel::ChannelConfig;
    use crate::config::{HubConfig, RampConfig};
    use crate::hal::{MockClock, MockTransport};
    use crate::hub::HubKind;

    #[test]
    fn worker_ramps_and_exits_on_link_loss() {
        let transport = Arc::new(MockTransport::new());
        let config = HubConfig::new("aa", HubKind::SBrick).with_channel(ChannelConfig::motor(0));
        let hub = Hub::new(
            &config,
            RampConfig::default().with_tick_ms(1).with_steps(255, 255),
            transport.clone(),
            Arc::new(MockClock::new()),
        );
        hub.attach_discovery(transport.add_peripheral("aa"));
        assert!(hub.connect(0));
        hub.drive(0, 100);

        let worker = hub.start_ramp_worker().unwrap();
        assert_eq!(worker.address(), "aa");

        let deadline = Instant::now() + Duration::from_secs(5);
        while hub.channels()[0].current_speed() != 255 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(hub.channels()[0].current_speed(), 255);

        transport.drop_link("aa");
        worker.join();
        assert!(hub.take_link_lost());
    }

    #[test]
    fn worker_stops_when_hub_reconnects() {
        let transport = Arc::new(MockTransport::new());
        let config = HubConfig::new("aa", HubKind::SBrick).with_channel(ChannelConfig::motor(0));
        let hub = Hub::new(
            &config,
            RampConfig::default().with_tick_ms(20),
            transport.clone(),
            Arc::new(MockClock::new()),
        );
        let handle = transport.add_peripheral("aa");
        hub.attach_discovery(handle);
        assert!(hub.connect(0));
        let first = hub.start_ramp_worker().unwrap();

        hub.disconnect();
        assert!(hub.attach_discovery(handle));
        assert!(hub.connect(0));
        let second = hub.start_ramp_worker().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !first.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(first.is_finished());
        assert!(!second.is_finished());

        hub.disconnect();
        first.join();
        second.join();
        assert!(!hub.take_link_lost());
    }
}
