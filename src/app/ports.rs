//! Port traits — the hexagonal boundary between bridge logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Router / OutputHandler / InputPoller / ConnectionManager
//! ```
//!
//! Driven adapters (I²C expanders, the MQTT client) implement these traits.
//! The bridge logic consumes them through `Arc<dyn …>` handles shared by the
//! pollers, the command tasks and the connection loop. Host tests substitute
//! mocks.

use core::time::Duration;

use crate::addressing::Channel;
use crate::error::{ConnectionError, HardwareError};

// ───────────────────────────────────────────────────────────────
// Pin port (driven adapter: expander hardware ↔ bridge)
// ───────────────────────────────────────────────────────────────

/// Logical read/write access to a single channel.
///
/// Values are **logical**: `true` means asserted / energised.  Any electrical
/// polarity (active-low relays, pulled-up inputs) is the implementor's
/// concern and must not leak past this trait.
pub trait PinPort: Send + Sync {
    /// Current logical state of `channel`.
    fn read(&self, channel: Channel) -> Result<bool, HardwareError>;

    /// Drive `channel` to the logical `value`.  Only valid on output buses.
    fn write(&self, channel: Channel, value: bool) -> Result<(), HardwareError>;
}

// ───────────────────────────────────────────────────────────────
// Status publisher (driven adapter: bridge → message bus)
// ───────────────────────────────────────────────────────────────

/// Fire-and-forget publish.  Implementations log failures themselves; the
/// caller's control flow never sees them.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool);
}

// ───────────────────────────────────────────────────────────────
// Inbound message handler (connection loop → router)
// ───────────────────────────────────────────────────────────────

/// Callback the connection loop invokes for every message received on a
/// fully subscribed session.  Must not block for long: slow work belongs on
/// a separate task.
pub trait MessageHandler: Send + Sync {
    fn on_message(&self, topic: &str, payload: &[u8]);
}

// ───────────────────────────────────────────────────────────────
// MQTT transport (driven adapter: connection manager ↔ broker)
// ───────────────────────────────────────────────────────────────

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QoS {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    /// Map the numeric level from configuration.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }
}

/// Something the transport observed on the current session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message { topic: String, payload: Vec<u8> },
    Disconnected,
}

/// Broker session primitives.  All methods take `&self`: the connection
/// loop receives while command and poller tasks publish concurrently.
pub trait MqttTransport: Send + Sync {
    /// Open a fresh session.  Any previous session is discarded.
    fn connect(&self) -> Result<(), ConnectionError>;

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ConnectionError>;

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
    -> Result<(), ConnectionError>;

    /// Wait up to `wait` for the next event.  `Ok(None)` on timeout.
    fn recv(&self, wait: Duration) -> Result<Option<TransportEvent>, ConnectionError>;

    /// Close the session.  Idempotent.
    fn disconnect(&self);
}
