//! Inbound command messages and the outbound status wire format.
//!
//! Inbound (JSON):
//!
//! ```text
//! { "method": "value",
//!   "params": { "device_id": 1001, "object_type": 4,
//!               "object_identifier": 3201, "value": 1 } }
//! ```
//!
//! Outbound (plain text, single spaces, fixed order):
//!
//! ```text
//! <device_id> <object_type> <object_identifier> <value>
//! ```

use core::fmt::Write as _;

use serde::Deserialize;
use serde_json::Value;

use crate::error::RoutingError;

use super::ports::QoS;

/// The only supported command verb.
pub const METHOD_VALUE: &str = "value";

/// Delivery for command replies and polled input states.  Status is
/// republished continuously, so it is neither acknowledged nor retained.
pub const STATUS_QOS: QoS = QoS::AtMostOnce;
pub const STATUS_RETAIN: bool = false;

/// Object type codes carried in `object_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    BinaryInput,
    BinaryOutput,
}

impl ObjectType {
    pub const BINARY_INPUT: i64 = 3;
    pub const BINARY_OUTPUT: i64 = 4;

    pub fn from_code(code: i64) -> Result<Self, RoutingError> {
        match code {
            Self::BINARY_INPUT => Ok(Self::BinaryInput),
            Self::BINARY_OUTPUT => Ok(Self::BinaryOutput),
            other => Err(RoutingError::UnsupportedObjectType(other)),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::BinaryInput => Self::BINARY_INPUT,
            Self::BinaryOutput => Self::BINARY_OUTPUT,
        }
    }
}

/// A decoded inbound payload.  Bytes that are not JSON are kept as text so
/// that decoding itself never fails.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    Structured(Value),
    Text(String),
}

/// Decode raw payload bytes.  Invalid UTF-8 is replaced, never rejected.
pub fn decode_payload(raw: &[u8]) -> Decoded {
    let text = String::from_utf8_lossy(raw);
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => Decoded::Structured(value),
        Err(_) => Decoded::Text(text.into_owned()),
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    method: Option<Value>,
    params: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Params {
    device_id: i64,
    object_type: i64,
    object_identifier: i64,
    #[serde(default = "default_value")]
    value: f64,
    /// Accepted for compatibility; not used.
    #[serde(default)]
    #[allow(dead_code)]
    priority: Option<i64>,
}

fn default_value() -> f64 {
    1.0
}

/// One command, transient per inbound frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandMessage {
    pub device_id: i64,
    /// Raw type code; validated at dispatch.
    pub object_type: i64,
    pub object_identifier: i64,
    pub value: f64,
}

impl CommandMessage {
    /// Binary interpretation of `value`: anything non-zero is on.
    pub fn requested_state(&self) -> bool {
        self.value != 0.0
    }
}

/// Extract a command from a decoded payload.
///
/// `UnsupportedMethod` for envelopes with another verb, `Malformed` for
/// anything without the identifier fields.
pub fn parse_command(decoded: Decoded) -> Result<CommandMessage, RoutingError> {
    let Decoded::Structured(value) = decoded else {
        return Err(RoutingError::Malformed);
    };
    let envelope: Envelope = serde_json::from_value(value).map_err(|_| RoutingError::Malformed)?;
    if envelope.method.as_ref().and_then(Value::as_str) != Some(METHOD_VALUE) {
        return Err(RoutingError::UnsupportedMethod);
    }
    let params: Params = envelope
        .params
        .ok_or(RoutingError::Malformed)
        .and_then(|p| serde_json::from_value(p).map_err(|_| RoutingError::Malformed))?;
    Ok(CommandMessage {
        device_id: params.device_id,
        object_type: params.object_type,
        object_identifier: params.object_identifier,
        value: params.value,
    })
}

/// Fixed-capacity status payload.
pub type StatusPayload = heapless::String<64>;

/// Format `<device_id> <object_type> <object_identifier> <value>`.
pub fn format_status(
    device_id: i64,
    object_type: ObjectType,
    object_identifier: i64,
    value: bool,
) -> StatusPayload {
    let mut out = StatusPayload::new();
    // Four integers of at most 20 digits each plus separators fit in 64 bytes.
    let _ = write!(
        out,
        "{} {} {} {}",
        device_id,
        object_type.code(),
        object_identifier,
        u8::from(value)
    );
    out
}

/// Reply topic for a command topic: every literal `Set` becomes `Site`.
pub fn status_topic(command_topic: &str) -> String {
    command_topic.replace("Set", "Site")
}
