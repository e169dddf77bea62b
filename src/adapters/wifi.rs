//! Wi-Fi station bring-up.
//!
//! The broker is only reachable once the station has an address, so `main`
//! calls [`start_station`] before the connection manager starts.  Join
//! failures are retried with exponential backoff (2 s → 4 s → 8 s …
//! capped at 60 s); the bridge has nothing useful to do offline.
//!
//! ## cfg gating
//!
//! - **`target_os = "espidf"`**: real driver via `esp_idf_svc::wifi`.
//! - **all other targets**: only credential validation and backoff math,
//!   for host-side tests.

use core::fmt;

use crate::config::NetworkConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiError {
    InvalidSsid,
    InvalidPassword,
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSsid => write!(f, "SSID invalid (must be 1-32 printable ASCII bytes)"),
            Self::InvalidPassword => {
                write!(f, "password invalid (must be 8-64 bytes for WPA2, or empty for open)")
            }
        }
    }
}

impl core::error::Error for WifiError {}

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
const INITIAL_BACKOFF_SECS: u32 = 2;
const MAX_BACKOFF_SECS: u32 = 60;

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
fn next_backoff(secs: u32) -> u32 {
    secs.saturating_mul(2).min(MAX_BACKOFF_SECS)
}

/// Validated station credentials, sized for the IDF driver's fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationCredentials {
    pub ssid: heapless::String<32>,
    pub password: heapless::String<64>,
}

impl StationCredentials {
    pub fn from_config(net: &NetworkConfig) -> Result<Self, WifiError> {
        let ssid = net.ssid.as_str();
        if ssid.is_empty() || !ssid.bytes().all(|b| (0x20..=0x7E).contains(&b)) {
            return Err(WifiError::InvalidSsid);
        }
        let pw = net.password.as_str();
        if !pw.is_empty() && (pw.len() < 8 || pw.len() > 64) {
            return Err(WifiError::InvalidPassword);
        }
        Ok(Self {
            ssid: heapless::String::try_from(ssid).map_err(|()| WifiError::InvalidSsid)?,
            password: heapless::String::try_from(pw).map_err(|()| WifiError::InvalidPassword)?,
        })
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

#[cfg(target_os = "espidf")]
pub use esp_impl::start_station;

#[cfg(target_os = "espidf")]
mod esp_impl {
    use std::time::Duration;

    use esp_idf_hal::modem::Modem;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::sys::EspError;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
    use log::{info, warn};

    use super::{INITIAL_BACKOFF_SECS, StationCredentials, next_backoff};

    /// Start the station and block until it has joined and has an address.
    pub fn start_station(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        creds: &StationCredentials,
    ) -> Result<BlockingWifi<EspWifi<'static>>, EspError> {
        let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sysloop.clone(), Some(nvs))?, sysloop)?;
        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: creds.ssid.clone(),
            password: creds.password.clone(),
            auth_method: if creds.is_open() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        }))?;
        wifi.start()?;

        let mut backoff = INITIAL_BACKOFF_SECS;
        loop {
            info!("WiFi: joining '{}'", creds.ssid);
            match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
                Ok(()) => break,
                Err(e) => {
                    warn!("WiFi: join failed ({}), retry in {}s", e, backoff);
                    std::thread::sleep(Duration::from_secs(u64::from(backoff)));
                    backoff = next_backoff(backoff);
                }
            }
        }

        let ip = wifi.wifi().sta_netif().get_ip_info()?;
        info!("WiFi: connected, address {}", ip.ip);
        Ok(wifi)
    }
}
