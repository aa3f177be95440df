//! BLE transport on top of btleplug.
//!
//! btleplug is async; [`HubTransport`] is blocking. The transport owns a
//! small tokio runtime and blocks on it for every call, which is safe
//! from the control loop and from ramp worker threads alike (none of
//! them run inside a runtime).
//!
//! Frames are written without response to the hub type's control
//! characteristic:
//!
//! | Hub | Characteristic |
//! |-----|----------------|
//! | SBrick | `02b8cbcc-0e25-4bda-8790-a15f53e6010f` (remote control commands) |
//! | Powered Up | `00001624-1212-efde-1623-785feabcd123` (LWP3 hub characteristic) |

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::runtime::Runtime;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::TransportError;
use crate::hub::HubKind;
use crate::traits::{Advertisement, HubTransport, TransportHandle};

/// SBrick remote control commands characteristic.
pub const SBRICK_REMOTE_CONTROL_UUID: Uuid = Uuid::from_u128(0x02b8cbcc_0e25_4bda_8790_a15f53e6010f);

/// LEGO Wireless Protocol 3 hub characteristic.
pub const PU_HUB_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00001624_1212_efde_1623_785feabcd123);

fn characteristic_uuid(kind: HubKind) -> Uuid {
    match kind {
        HubKind::SBrick => SBRICK_REMOTE_CONTROL_UUID,
        HubKind::PoweredUp => PU_HUB_CHARACTERISTIC_UUID,
    }
}

struct KnownPeripheral {
    address: String,
    peripheral: Peripheral,
    control: Option<Characteristic>,
}

#[derive(Default)]
struct Registry {
    by_handle: HashMap<u64, KnownPeripheral>,
    next_handle: u64,
}

impl Registry {
    /// Handle for a scanned peripheral; stable across scans.
    fn register(&mut self, address: String, peripheral: Peripheral) -> TransportHandle {
        let existing = self
            .by_handle
            .iter()
            .find(|(_, known)| known.address == address)
            .map(|(handle, _)| *handle);

        if let Some(handle) = existing {
            if let Some(known) = self.by_handle.get_mut(&handle) {
                known.peripheral = peripheral;
            }
            return TransportHandle(handle);
        }

        self.next_handle += 1;
        self.by_handle.insert(
            self.next_handle,
            KnownPeripheral {
                address,
                peripheral,
                control: None,
            },
        );
        TransportHandle(self.next_handle)
    }
}

/// [`HubTransport`] backed by the first BLE adapter of the host.
pub struct BtleTransport {
    runtime: Runtime,
    adapter: Adapter,
    registry: Mutex<Registry>,
    connect_timeout: Duration,
}

impl BtleTransport {
    /// Open the first BLE adapter.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ble")
            .enable_all()
            .build()
            .map_err(|e| TransportError::AdapterNotAvailable(e.to_string()))?;

        let adapter = runtime.block_on(async {
            let manager = Manager::new()
                .await
                .map_err(|e| TransportError::AdapterNotAvailable(e.to_string()))?;
            let adapters = manager
                .adapters()
                .await
                .map_err(|e| TransportError::AdapterNotAvailable(e.to_string()))?;
            adapters
                .into_iter()
                .next()
                .ok_or_else(|| TransportError::AdapterNotAvailable("no BLE adapters".into()))
        })?;

        info!("BLE adapter initialized");
        Ok(Self {
            runtime,
            adapter,
            registry: Mutex::new(Registry::default()),
            connect_timeout,
        })
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peripheral(&self, handle: TransportHandle) -> Result<Peripheral, TransportError> {
        self.registry()
            .by_handle
            .get(&handle.0)
            .map(|known| known.peripheral.clone())
            .ok_or(TransportError::UnknownHandle(handle.0))
    }
}

impl HubTransport for BtleTransport {
    fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let peripherals = self.runtime.block_on(async {
            self.adapter
                .start_scan(ScanFilter::default())
                .await
                .map_err(|e| TransportError::ScanFailed(e.to_string()))?;
            tokio::time::sleep(duration).await;
            if let Err(e) = self.adapter.stop_scan().await {
                warn!(error = %e, "failed to stop BLE scan");
            }
            self.adapter
                .peripherals()
                .await
                .map_err(|e| TransportError::ScanFailed(e.to_string()))
        })?;

        let mut registry = self.registry();
        let found: Vec<_> = peripherals
            .into_iter()
            .map(|p| {
                let address = p.address().to_string();
                let handle = registry.register(address.clone(), p);
                Advertisement::new(address, handle)
            })
            .collect();

        debug!(count = found.len(), "scan finished");
        Ok(found)
    }

    fn connect(&self, handle: TransportHandle, kind: HubKind) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle)?;
        let uuid = characteristic_uuid(kind);

        let control = self.runtime.block_on(async {
            match timeout(self.connect_timeout, peripheral.connect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(TransportError::ConnectionFailed(e.to_string())),
                Err(_) => return Err(TransportError::ConnectionTimeout),
            }

            peripheral
                .discover_services()
                .await
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

            match peripheral.characteristics().into_iter().find(|c| c.uuid == uuid) {
                Some(c) => Ok(c),
                None => {
                    if let Err(e) = peripheral.disconnect().await {
                        debug!(error = %e, "disconnect after failed lookup failed");
                    }
                    Err(TransportError::CharacteristicNotFound(uuid.to_string()))
                }
            }
        })?;

        if let Some(known) = self.registry().by_handle.get_mut(&handle.0) {
            known.control = Some(control);
        }
        Ok(())
    }

    fn write(&self, handle: TransportHandle, frame: &[u8]) -> Result<(), TransportError> {
        let (peripheral, control) = {
            let registry = self.registry();
            let known = registry
                .by_handle
                .get(&handle.0)
                .ok_or(TransportError::UnknownHandle(handle.0))?;
            let control = known.control.clone().ok_or(TransportError::NotConnected)?;
            (known.peripheral.clone(), control)
        };

        self.runtime
            .block_on(peripheral.write(&control, frame, WriteType::WithoutResponse))
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    fn is_connected(&self, handle: TransportHandle) -> bool {
        match self.peripheral(handle) {
            Ok(p) => self.runtime.block_on(p.is_connected()).unwrap_or(false),
            Err(_) => false,
        }
    }

    fn disconnect(&self, handle: TransportHandle) -> Result<(), TransportError> {
        let peripheral = self.peripheral(handle)?;
        if let Some(known) = self.registry().by_handle.get_mut(&handle.0) {
            known.control = None;
        }
        self.runtime
            .block_on(peripheral.disconnect())
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}
