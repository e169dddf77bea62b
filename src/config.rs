//! Bridge configuration.
//!
//! Parsed once at boot from a JSON document and validated before any task
//! starts.  Everything here is immutable for the lifetime of the process;
//! the [`ChannelRegistry`](crate::registry::ChannelRegistry) is built from it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default back-off after the broker refuses a connection.
pub const DEFAULT_RECONNECT_DELAY_MS: u32 = 10_000;
/// Default upper bound on a single hardware read or write.
pub const DEFAULT_HARDWARE_TIMEOUT_MS: u32 = 500;

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeConfig {
    /// Device identity; commands for other ids are ignored.
    pub device_id: u32,
    /// Wi-Fi station credentials (device builds only).
    #[serde(default)]
    pub network: NetworkConfig,
    pub broker: BrokerConfig,
    /// MQTT QoS for command subscriptions (0, 1 or 2).
    #[serde(default)]
    pub qos: u8,
    /// Command topics, re-subscribed after every connect.
    pub subscribe: Vec<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u32,
    #[serde(default = "default_hardware_timeout_ms")]
    pub hardware_timeout_ms: u32,
    #[serde(default)]
    pub input_buses: Vec<InputBusConfig>,
    #[serde(default)]
    pub output_buses: Vec<OutputBusConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    pub ssid: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl BrokerConfig {
    /// `mqtt://host:port` URL for the client.
    pub fn url(&self) -> String {
        format!("mqtt://{}:{}", self.host, self.port)
    }
}

/// One input expander.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InputBusConfig {
    /// 7-bit I²C address, also the bus index in identifiers.
    pub address: u8,
    /// Nominal poll period.
    pub interval_ms: u32,
    /// Bus-level status topic, used for pins without their own topic.
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub pin_topics: BTreeMap<u8, String>,
}

/// One output expander.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputBusConfig {
    pub address: u8,
    /// Bus-level pulse delay; 0 means latched writes.
    #[serde(default)]
    pub delay_ms: u32,
    /// Bus-level rest state.
    #[serde(default)]
    pub default: Option<bool>,
    #[serde(default)]
    pub pins: BTreeMap<u8, OutputPinConfig>,
}

/// Per-pin overrides of the bus-level output settings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutputPinConfig {
    #[serde(default)]
    pub delay_ms: Option<u32>,
    #[serde(default)]
    pub default: Option<bool>,
}

fn default_port() -> u16 {
    1883
}

fn default_reconnect_delay_ms() -> u32 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_hardware_timeout_ms() -> u32 {
    DEFAULT_HARDWARE_TIMEOUT_MS
}

impl BridgeConfig {
    /// Parse and range-check a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            line: e.line(),
            column: e.column(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Field-level validation.  Cross-references between buses are checked
    /// when the registry is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.is_empty() {
            return Err(ConfigError::Invalid("broker.host is empty"));
        }
        if self.qos > 2 {
            return Err(ConfigError::Invalid("qos must be 0, 1 or 2"));
        }
        if self.subscribe.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid("empty subscribe topic"));
        }
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::Invalid("reconnect_delay_ms must be > 0"));
        }
        if self.hardware_timeout_ms == 0 {
            return Err(ConfigError::Invalid("hardware_timeout_ms must be > 0"));
        }
        if self.input_buses.iter().any(|b| b.interval_ms == 0) {
            return Err(ConfigError::Invalid("input bus interval_ms must be > 0"));
        }
        Ok(())
    }
}
