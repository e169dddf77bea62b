//! Channel registry — the immutable map of configured buses.
//!
//! Built once from [`BridgeConfig`] at boot.  Every cross-reference is
//! checked here so that a misconfigured device fails before any task
//! starts; after construction the registry is shared read-only (behind an
//! `Arc`) by the router, the output handler and every poller.
//!
//! Lookups fall back from the per-pin setting to the bus-level setting:
//!
//! ```text
//!   topic_for(37, 1)   pin_topics[1]  ──▶  topic (bus)  ──▶  MissingTopic
//!   delay_for(32, 0)   pins[0].delay  ──▶  delay (bus)
//!   default_for(32, 0) pins[0].default ─▶  default (bus) ──▶  None
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use crate::addressing::{self, Channel, MAX_BUS, PINS_PER_BUS};
use crate::config::{BridgeConfig, OutputPinConfig};
use crate::error::{AddressingError, ConfigError};

/// Role of an expander bus.  A bus has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusRole {
    Input,
    Output,
}

#[derive(Debug, Clone)]
struct InputBus {
    interval: Duration,
    topic: Option<String>,
    pin_topics: [Option<String>; PINS_PER_BUS as usize],
}

#[derive(Debug, Clone)]
struct OutputBus {
    delay: Duration,
    default: Option<bool>,
    pins: [OutputPinConfig; PINS_PER_BUS as usize],
}

/// Immutable view of all configured channels.
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    inputs: BTreeMap<u8, InputBus>,
    outputs: BTreeMap<u8, OutputBus>,
}

fn check_address(address: u8) -> Result<(), ConfigError> {
    if address == 0 || address > MAX_BUS {
        return Err(ConfigError::BadBusAddress(address));
    }
    Ok(())
}

fn check_pin(bus: u8, pin: u8) -> Result<usize, ConfigError> {
    if pin >= PINS_PER_BUS {
        return Err(ConfigError::BadPin { bus, pin });
    }
    Ok(pin as usize)
}

impl ChannelRegistry {
    /// Build the registry, rejecting duplicate addresses (within or across
    /// roles), out-of-range pins, and input pins without a topic.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, ConfigError> {
        let mut inputs = BTreeMap::new();
        let mut outputs = BTreeMap::new();

        for bus in &config.input_buses {
            check_address(bus.address)?;
            if bus.interval_ms == 0 {
                return Err(ConfigError::MissingInterval(bus.address));
            }
            let mut pin_topics: [Option<String>; PINS_PER_BUS as usize] = Default::default();
            for (&pin, topic) in &bus.pin_topics {
                pin_topics[check_pin(bus.address, pin)?] = Some(topic.clone());
            }
            let entry = InputBus {
                interval: Duration::from_millis(u64::from(bus.interval_ms)),
                topic: bus.topic.clone(),
                pin_topics,
            };
            if inputs.insert(bus.address, entry).is_some() {
                return Err(ConfigError::DuplicateBus(bus.address));
            }
        }

        for bus in &config.output_buses {
            check_address(bus.address)?;
            if inputs.contains_key(&bus.address) {
                return Err(ConfigError::DuplicateBus(bus.address));
            }
            let mut pins = [OutputPinConfig::default(); PINS_PER_BUS as usize];
            for (&pin, pin_cfg) in &bus.pins {
                pins[check_pin(bus.address, pin)?] = *pin_cfg;
            }
            let entry = OutputBus {
                delay: Duration::from_millis(u64::from(bus.delay_ms)),
                default: bus.default,
                pins,
            };
            if outputs.insert(bus.address, entry).is_some() {
                return Err(ConfigError::DuplicateBus(bus.address));
            }
        }

        let registry = Self { inputs, outputs };

        // Every input channel publishes every cycle, so each one needs a topic.
        for bus in registry.input_buses() {
            for pin in 0..PINS_PER_BUS {
                registry.topic_for(Channel { bus, pin })?;
            }
        }

        Ok(registry)
    }

    /// Role of `bus`, or `None` if it is not configured.
    pub fn role(&self, bus: u8) -> Option<BusRole> {
        if self.inputs.contains_key(&bus) {
            Some(BusRole::Input)
        } else if self.outputs.contains_key(&bus) {
            Some(BusRole::Output)
        } else {
            None
        }
    }

    /// Input bus addresses in ascending order.
    pub fn input_buses(&self) -> impl Iterator<Item = u8> + '_ {
        self.inputs.keys().copied()
    }

    /// Output bus addresses in ascending order.
    pub fn output_buses(&self) -> impl Iterator<Item = u8> + '_ {
        self.outputs.keys().copied()
    }

    /// Every output channel, bus-major.
    pub fn output_channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.outputs
            .keys()
            .flat_map(|&bus| (0..PINS_PER_BUS).map(move |pin| Channel { bus, pin }))
    }

    /// Decode `identifier` and require its bus to be configured with `role`.
    pub fn resolve(&self, identifier: i64, role: BusRole) -> Result<Channel, AddressingError> {
        let channel = addressing::decode(identifier)?;
        match self.role(channel.bus) {
            None => Err(AddressingError::UnknownBus(channel.bus)),
            Some(r) if r != role => Err(AddressingError::WrongRole { bus: channel.bus }),
            Some(_) => Ok(channel),
        }
    }

    /// Status topic for an input channel: per-pin topic, else the bus topic.
    pub fn topic_for(&self, channel: Channel) -> Result<&str, ConfigError> {
        let missing = ConfigError::MissingTopic {
            bus: channel.bus,
            pin: channel.pin,
        };
        let bus = self.inputs.get(&channel.bus).ok_or(missing)?;
        bus.pin_topics
            .get(channel.pin as usize)
            .and_then(Option::as_deref)
            .or(bus.topic.as_deref())
            .ok_or(missing)
    }

    /// Nominal poll period of an input bus.
    pub fn interval_for(&self, bus: u8) -> Result<Duration, ConfigError> {
        self.inputs
            .get(&bus)
            .map(|b| b.interval)
            .ok_or(ConfigError::MissingInterval(bus))
    }

    /// Pulse delay of an output channel; zero for latched writes and for
    /// channels that are not outputs.
    pub fn delay_for(&self, channel: Channel) -> Duration {
        let Some(bus) = self.outputs.get(&channel.bus) else {
            return Duration::ZERO;
        };
        bus.pins
            .get(channel.pin as usize)
            .and_then(|p| p.delay_ms)
            .map_or(bus.delay, |ms| Duration::from_millis(u64::from(ms)))
    }

    /// Configured rest value of an output channel, if any.
    pub fn default_for(&self, channel: Channel) -> Option<bool> {
        let bus = self.outputs.get(&channel.bus)?;
        bus.pins
            .get(channel.pin as usize)
            .and_then(|p| p.default)
            .or(bus.default)
    }

    /// Value driven at startup: the configured default, else off.
    pub fn rest_state(&self, channel: Channel) -> bool {
        self.default_for(channel).unwrap_or(false)
    }
}
