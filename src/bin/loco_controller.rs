//! BLE locomotive controller.
//!
//! Usage: `loco_controller [config.json]` (defaults to `locos.json`).
//! Log filtering follows `RUST_LOG`, e.g. `RUST_LOG=rs_trainz_ble=debug`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rs_trainz_ble::hal::{BtleTransport, LoggingHost, StdDelay, SystemClock};
use rs_trainz_ble::services::MqttSubscriber;
use rs_trainz_ble::{Config, ControlLoop};

const DEFAULT_CONFIG_PATH: &str = "locos.json";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    setup_logging();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!("Loading configuration from: {}", path);
    let config = Config::from_file(&path).with_context(|| format!("loading {path}"))?;
    info!(locos = config.locos.len(), "configuration loaded");

    let transport =
        Arc::new(BtleTransport::new(CONNECT_TIMEOUT).context("initializing BLE adapter")?);

    let (mut control, commands) = ControlLoop::from_config(
        &config,
        transport,
        Arc::new(SystemClock::new()),
        LoggingHost,
        StdDelay,
    );

    if config.mqtt.enabled {
        MqttSubscriber::new(&config.mqtt, commands)
            .spawn()
            .context("starting MQTT subscriber")?;
    } else {
        warn!("MQTT disabled, no commands will be received");
    }

    control.run()
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .init();
}
