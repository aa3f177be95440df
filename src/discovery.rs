//! Batched BLE discovery.
//!
//! One scan pass serves every hub still waiting to be found. Scan results
//! are matched against the requested hubs by address (ignoring case) and
//! matching hubs move to `Discovered`. Everything else the scan saw is
//! ignored.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::DiscoveryError;
use crate::hub::{Hub, HubState};
use crate::traits::HubTransport;

/// Runs discovery scans, at most one at a time.
pub struct DiscoveryScanner {
    transport: Arc<dyn HubTransport>,
    scan_duration: Duration,
    scanning: AtomicBool,
}

/// Clears the in-flight flag when the scan ends, however it ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl DiscoveryScanner {
    /// Create a scanner using the given scan duration.
    pub fn new(transport: Arc<dyn HubTransport>, scan_duration: Duration) -> Self {
        Self {
            transport,
            scan_duration,
            scanning: AtomicBool::new(false),
        }
    }

    /// Whether a scan is running right now.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }

    /// Scan once for all `hubs` that are still undiscovered.
    ///
    /// Returns how many hubs were discovered. No scan is started when no
    /// hub needs one.
    pub fn discover(&self, hubs: &[&Hub]) -> Result<usize, DiscoveryError> {
        let wanted: Vec<&Hub> = hubs
            .iter()
            .copied()
            .filter(|h| h.state() == HubState::Undiscovered)
            .collect();

        if wanted.is_empty() {
            return Ok(0);
        }

        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("scan already in progress");
            return Err(DiscoveryError::ScanInProgress);
        }
        let _guard = ScanGuard(&self.scanning);

        info!(hubs = wanted.len(), "scanning for hubs");
        let seen = self.transport.scan(self.scan_duration).map_err(|e| {
            warn!(error = %e, "scan failed");
            DiscoveryError::from(e)
        })?;

        let mut discovered = 0;
        for adv in &seen {
            for hub in wanted.iter().filter(|h| adv.matches(h.address())) {
                if hub.attach_discovery(adv.handle) {
                    discovered += 1;
                }
            }
        }

        debug!(seen = seen.len(), discovered, "scan matched");
        Ok(discovered)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::channel::ChannelConfig;
    use crate::config::{HubConfig, RampConfig};
    use crate::error::TransportError;
    use crate::hal::{MockClock, MockTransport};
    use crate::hub::HubKind;

    fn hub(transport: &Arc<MockTransport>, address: &str) -> Hub {
        let config = HubConfig::new(address, HubKind::SBrick).with_channel(ChannelConfig::motor(0));
        Hub::new(
            &config,
            RampConfig::default(),
            transport.clone(),
            Arc::new(MockClock::new()),
        )
    }

    fn scanner(transport: &Arc<MockTransport>) -> DiscoveryScanner {
        DiscoveryScanner::new(transport.clone(), Duration::from_millis(10))
    }

    #[test]
    fn no_scan_without_undiscovered_hubs() {
        let transport = Arc::new(MockTransport::new());
        assert_eq!(scanner(&transport).discover(&[]).unwrap(), 0);

        let a = hub(&transport, "aa");
        a.attach_discovery(transport.add_peripheral("aa"));
        assert_eq!(scanner(&transport).discover(&[&a]).unwrap(), 0);
        assert_eq!(transport.scan_count(), 0);
    }

    #[test]
    fn one_scan_for_many_hubs() {
        let transport = Arc::new(MockTransport::new());
        let a = hub(&transport, "AA:01");
        let b = hub(&transport, "aa:02");
        let c = hub(&transport, "aa:03");
        transport.add_peripheral("aa:01");
        transport.add_peripheral("AA:02");
        transport.add_peripheral("ff:ff");

        assert_eq!(scanner(&transport).discover(&[&a, &b, &c]).unwrap(), 2);
        assert_eq!(transport.scan_count(), 1);
        assert_eq!(a.state(), HubState::Discovered);
        assert_eq!(b.state(), HubState::Discovered);
        assert_eq!(c.state(), HubState::Undiscovered);
    }

    #[test]
    fn scan_error_is_returned() {
        let transport = Arc::new(MockTransport::new());
        let a = hub(&transport, "aa");
        transport.fail_next_scan(TransportError::ScanFailed("busy".into()));

        let s = scanner(&transport);
        assert!(matches!(
            s.discover(&[&a]),
            Err(DiscoveryError::Transport(TransportError::ScanFailed(_)))
        ));
        assert!(!s.is_scanning());
        assert_eq!(a.state(), HubState::Undiscovered);
    }

    #[test]
    fn concurrent_scan_is_rejected() {
        let transport = Arc::new(MockTransport::new());
        transport.set_scan_delay(Duration::from_millis(300));
        let a = hub(&transport, "aa");
        let b = hub(&transport, "bb");
        let s = Arc::new(scanner(&transport));

        let background = {
            let s = s.clone();
            let a = a.clone();
            thread::spawn(move || s.discover(&[&a]))
        };

        while !s.is_scanning() {
            thread::yield_now();
        }
        assert_eq!(s.discover(&[&b]), Err(DiscoveryError::ScanInProgress));
        assert!(background.join().unwrap().is_ok());
        assert!(!s.is_scanning());
    }
}
