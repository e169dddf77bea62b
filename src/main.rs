//! iobridge firmware — main entry point.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                    │
//! │                                                               │
//! │  ExpanderPins ─▶ GuardedPins          EspMqttTransport        │
//! │  (I²C bank)      (I/O worker)         (MQTT session)          │
//! │                                                               │
//! │  ──────────────── Port Trait Boundary ─────────────────       │
//! │                                                               │
//! │   InputPoller × N ──publish──▶ Session ◀── ConnectionManager  │
//! │   Router (task per command) ◀──on_message──┘                  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Only configuration and peripheral bring-up failures end the process;
//! everything after that is logged and retried.
#![deny(unused_must_use)]

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::units::FromValueType;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use log::{info, warn};

use iobridge::Error;
use iobridge::adapters::hardware::ExpanderPins;
use iobridge::adapters::hw_guard::GuardedPins;
use iobridge::adapters::mqtt::EspMqttTransport;
use iobridge::adapters::wifi::{self, StationCredentials};
use iobridge::app::poller::InputPoller;
use iobridge::app::ports::{PinPort, StatusPublisher};
use iobridge::app::router::Router;
use iobridge::config::BridgeConfig;
use iobridge::connection::{ConnectionManager, ConnectionSettings};
use iobridge::drivers::task_pin::{self, Core};
use iobridge::registry::ChannelRegistry;

/// Compiled-in bridge configuration.
const CONFIG_JSON: &str = include_str!("../config/bridge.json");

/// Expander bus clock; PCF8574 parts top out at 100 kHz.
const I2C_BAUD_KHZ: u32 = 100;

const POLLER_PRIORITY: u8 = 5;
const POLLER_STACK_KB: usize = 6;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    info!("iobridge v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Configuration (fatal on error) ─────────────────────
    let cfg = BridgeConfig::from_json(CONFIG_JSON)
        .map_err(Error::from)
        .context("bridge.json")?;
    let registry = Arc::new(
        ChannelRegistry::from_config(&cfg)
            .map_err(Error::from)
            .context("bus layout")?,
    );
    let settings = ConnectionSettings::from_config(&cfg)
        .map_err(Error::from)
        .context("broker settings")?;
    let creds = StationCredentials::from_config(&cfg.network).context("network")?;
    info!(
        "Config: device {}, {} input / {} output buses",
        cfg.device_id,
        registry.input_buses().count(),
        registry.output_buses().count()
    );

    // ── 3. Expander bank ──────────────────────────────────────
    let peripherals = Peripherals::take()?;
    let i2c = I2cDriver::new(
        peripherals.i2c0,
        peripherals.pins.gpio14,
        peripherals.pins.gpio15,
        &I2cConfig::new().baudrate(I2C_BAUD_KHZ.kHz().into()),
    )?;
    let expanders = ExpanderPins::new(i2c, &registry)
        .map_err(Error::from)
        .context("expander init")?;
    let pins: Arc<dyn PinPort> = Arc::new(GuardedPins::spawn(
        Arc::new(expanders),
        Duration::from_millis(u64::from(cfg.hardware_timeout_ms)),
    )?);

    // ── 4. Network ────────────────────────────────────────────
    let sysloop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let _wifi = wifi::start_station(peripherals.modem, sysloop, nvs, &creds)?;

    // ── 5. Session, router, pollers ───────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let transport = Arc::new(EspMqttTransport::new(cfg.broker.clone()));
    let manager = ConnectionManager::new(transport, settings, shutdown.clone());
    let publisher: Arc<dyn StatusPublisher> = Arc::new(manager.session());

    let router = Router::new(
        i64::from(cfg.device_id),
        registry.clone(),
        pins.clone(),
        publisher.clone(),
    );

    for bus in registry.input_buses() {
        let poller = InputPoller::new(
            bus,
            i64::from(cfg.device_id),
            registry.clone(),
            pins.clone(),
            publisher.clone(),
            shutdown.clone(),
        )?;
        if let Err(e) = task_pin::spawn_on_core(
            Core::App,
            POLLER_PRIORITY,
            POLLER_STACK_KB,
            "poll\0",
            move || poller.run(),
        ) {
            warn!("POLL bus {}: not started: {}", bus, e);
        }
    }

    // ── 6. Connection loop (runs on the main task) ────────────
    info!("System ready. Entering connection loop.");
    manager.run(&router);
    Ok(())
}
