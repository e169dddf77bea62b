//! Unified error types for the I/O bridge.
//!
//! A single `Error` enum that every subsystem converts into, so the router,
//! poller and connection loop can log failures uniformly.  All variants are
//! `Copy` so they can be handed across tasks without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An identifier could not be mapped to a configured channel.
    Addressing(AddressingError),
    /// A registry lookup or configuration check failed.
    Config(ConfigError),
    /// The hardware shim failed to complete a read or write.
    Hardware(HardwareError),
    /// A write was not confirmed by the read-back.
    Verification(VerificationMismatch),
    /// The message-bus session failed.
    Connection(ConnectionError),
    /// An inbound message was rejected before dispatch.
    Routing(RoutingError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Addressing(e) => write!(f, "addressing: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Hardware(e) => write!(f, "hardware: {e}"),
            Self::Verification(e) => write!(f, "verification: {e}"),
            Self::Connection(e) => write!(f, "connection: {e}"),
            Self::Routing(e) => write!(f, "routing: {e}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Addressing errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingError {
    /// Trailing pin digits encode a value outside `0..8`.
    PinOutOfRange { identifier: i64, pin: u8 },
    /// Negative, too short, or bus digits outside the 7-bit bus range.
    Malformed(i64),
    /// The bus digits name a bus that is not configured.
    UnknownBus(u8),
    /// The bus exists but has the other role (input vs output).
    WrongRole { bus: u8 },
}

impl fmt::Display for AddressingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PinOutOfRange { identifier, pin } => {
                write!(f, "identifier {identifier}: pin {pin} out of range 0..8")
            }
            Self::Malformed(id) => write!(f, "malformed identifier {id}"),
            Self::UnknownBus(bus) => write!(f, "bus {bus} is not configured"),
            Self::WrongRole { bus } => write!(f, "bus {bus} has the wrong role for this command"),
        }
    }
}

impl From<AddressingError> for Error {
    fn from(e: AddressingError) -> Self {
        Self::Addressing(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration document could not be parsed.
    Parse { line: usize, column: usize },
    /// A field failed range validation.
    Invalid(&'static str),
    /// The same bus address is listed twice (or in both roles).
    DuplicateBus(u8),
    /// A bus address is outside the 7-bit range.
    BadBusAddress(u8),
    /// A per-pin override names a pin outside `0..8`.
    BadPin { bus: u8, pin: u8 },
    /// No per-pin or bus-level topic exists for this channel.
    MissingTopic { bus: u8, pin: u8 },
    /// The bus has no poll interval (not an input bus).
    MissingInterval(u8),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { line, column } => {
                write!(f, "parse error at line {line}, column {column}")
            }
            Self::Invalid(msg) => write!(f, "invalid value: {msg}"),
            Self::DuplicateBus(bus) => write!(f, "bus {bus} configured more than once"),
            Self::BadBusAddress(bus) => write!(f, "bus address {bus} outside 1..=127"),
            Self::BadPin { bus, pin } => write!(f, "bus {bus}: pin {pin} outside 0..8"),
            Self::MissingTopic { bus, pin } => write!(f, "no topic for bus {bus} pin {pin}"),
            Self::MissingInterval(bus) => write!(f, "no poll interval for bus {bus}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

// ---------------------------------------------------------------------------
// Hardware errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    /// The I²C transfer to the expander at `bus` failed.
    Transfer { bus: u8 },
    /// No expander is initialised at this address.
    NotConfigured { bus: u8 },
    /// Writes are only allowed on output buses.
    ReadOnly { bus: u8 },
    /// The call did not complete within the hardware timeout.
    Timeout,
    /// The I/O worker queue is full.
    Busy,
    /// The I/O worker has exited.
    WorkerGone,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transfer { bus } => write!(f, "I2C transfer to bus {bus} failed"),
            Self::NotConfigured { bus } => write!(f, "no expander at bus {bus}"),
            Self::ReadOnly { bus } => write!(f, "bus {bus} is an input bus"),
            Self::Timeout => write!(f, "hardware call timed out"),
            Self::Busy => write!(f, "hardware queue full"),
            Self::WorkerGone => write!(f, "hardware worker stopped"),
        }
    }
}

impl From<HardwareError> for Error {
    fn from(e: HardwareError) -> Self {
        Self::Hardware(e)
    }
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// The read-back after a write disagreed with the written logical value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationMismatch {
    pub bus: u8,
    pub pin: u8,
    pub written: bool,
    pub read: bool,
}

impl fmt::Display for VerificationMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bus {} pin {}: wrote {} but read back {}",
            self.bus, self.pin, self.written as u8, self.read as u8
        )
    }
}

impl From<VerificationMismatch> for Error {
    fn from(e: VerificationMismatch) -> Self {
        Self::Verification(e)
    }
}

// ---------------------------------------------------------------------------
// Connection errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker actively refused the connection.
    Refused,
    /// The broker could not be reached or the handshake failed.
    Failed,
    /// The operation needs a connected session.
    NotConnected,
    /// A subscribe request was rejected.
    SubscribeFailed,
    /// A publish request was rejected.
    PublishFailed,
    /// The session dropped while waiting for events.
    Lost,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused => write!(f, "connection refused"),
            Self::Failed => write!(f, "connection failed"),
            Self::NotConnected => write!(f, "not connected"),
            Self::SubscribeFailed => write!(f, "subscribe failed"),
            Self::PublishFailed => write!(f, "publish failed"),
            Self::Lost => write!(f, "connection lost"),
        }
    }
}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Self::Connection(e)
    }
}

// ---------------------------------------------------------------------------
// Routing errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingError {
    /// `object_type` is neither binary input nor binary output.
    UnsupportedObjectType(i64),
    /// Payload is not a command envelope with the required fields.
    Malformed,
    /// `method` is not the supported verb.
    UnsupportedMethod,
    /// Addressed to a different device.
    ForeignDevice(i64),
}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedObjectType(t) => write!(f, "unsupported object type {t}"),
            Self::Malformed => write!(f, "malformed command message"),
            Self::UnsupportedMethod => write!(f, "unsupported method"),
            Self::ForeignDevice(id) => write!(f, "addressed to device {id}"),
        }
    }
}

impl From<RoutingError> for Error {
    fn from(e: RoutingError) -> Self {
        Self::Routing(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
