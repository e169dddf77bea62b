//! iobridge library.
//!
//! Bridges an MQTT broker to banks of I²C digital I/O expanders.  The pure
//! logic and the host-testable adapters are exposed for integration
//! testing; ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod adapters;
pub mod addressing;
pub mod app;
pub mod config;
pub mod connection;
pub mod drivers;
pub mod error;
pub mod registry;

pub use error::{Error, Result};
