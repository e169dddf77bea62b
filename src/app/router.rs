//! Message router — inbound command → hardware → status reply.
//!
//! ```text
//!   on_message(topic, bytes)
//!     │ decode (JSON, else text) ── not a "value" command ──▶ drop (debug)
//!     │ device_id ≠ ours ─────────────────────────────────▶ drop (debug)
//!     ▼ spawn command task
//!   handle_command
//!     ├─ BINARY_OUTPUT ─▶ OutputHandler::set ─▶ publish on confirm
//!     ├─ BINARY_INPUT  ─▶ PinPort::read      ─▶ publish
//!     └─ other         ─▶ UnsupportedObjectType (warn, dropped)
//! ```
//!
//! Replies go to the inbound topic with `Set` replaced by `Site`.  Each
//! accepted command runs on its own short-lived task so a pulsing relay
//! never stalls the receive loop or other channels.

use std::sync::Arc;

use log::{debug, error, warn};

use crate::drivers::task_pin::{self, Core};
use crate::error::{Error, Result, RoutingError};
use crate::registry::{BusRole, ChannelRegistry};

use super::commands::{
    CommandMessage, ObjectType, STATUS_QOS, STATUS_RETAIN, StatusPayload, decode_payload,
    format_status, parse_command, status_topic,
};
use super::output::{OutputHandler, SetOutcome};
use super::ports::{MessageHandler, PinPort, StatusPublisher};

/// Priority of command tasks (above pollers, below the MQTT stack).
const COMMAND_TASK_PRIORITY: u8 = 6;
const COMMAND_TASK_STACK_KB: usize = 6;

/// A status message that was handed to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub topic: String,
    pub payload: StatusPayload,
}

struct Shared {
    device_id: i64,
    registry: Arc<ChannelRegistry>,
    pins: Arc<dyn PinPort>,
    outputs: OutputHandler,
    publisher: Arc<dyn StatusPublisher>,
}

/// Cheap to clone; clones share the same output locks.
#[derive(Clone)]
pub struct Router {
    shared: Arc<Shared>,
}

impl Router {
    pub fn new(
        device_id: i64,
        registry: Arc<ChannelRegistry>,
        pins: Arc<dyn PinPort>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        let outputs = OutputHandler::new(registry.clone(), pins.clone());
        Self {
            shared: Arc::new(Shared {
                device_id,
                registry,
                pins,
                outputs,
                publisher,
            }),
        }
    }

    /// Decode a raw payload and check that it is a command for this device.
    pub fn accept(&self, payload: &[u8]) -> core::result::Result<CommandMessage, RoutingError> {
        let command = parse_command(decode_payload(payload))?;
        if command.device_id != self.shared.device_id {
            return Err(RoutingError::ForeignDevice(command.device_id));
        }
        Ok(command)
    }

    /// Execute one accepted command synchronously.
    ///
    /// Returns the reply that was published, or `None` when an output
    /// request matched the rest state and nothing changed.
    pub fn handle_command(&self, topic: &str, command: &CommandMessage) -> Result<Option<Reply>> {
        let s = &*self.shared;
        let reply_topic = status_topic(topic);

        match ObjectType::from_code(command.object_type)? {
            ObjectType::BinaryOutput => {
                let channel = s
                    .registry
                    .resolve(command.object_identifier, BusRole::Output)?;
                let mut reply = None;
                let outcome = s.outputs.set(channel, command.requested_state(), |confirmed| {
                    let payload = format_status(
                        s.device_id,
                        ObjectType::BinaryOutput,
                        command.object_identifier,
                        confirmed,
                    );
                    s.publisher
                        .publish(&reply_topic, &payload, STATUS_QOS, STATUS_RETAIN);
                    reply = Some(Reply {
                        topic: reply_topic.clone(),
                        payload,
                    });
                })?;
                if outcome == SetOutcome::Unchanged {
                    return Ok(None);
                }
                Ok(reply)
            }
            ObjectType::BinaryInput => {
                let channel = s
                    .registry
                    .resolve(command.object_identifier, BusRole::Input)?;
                let value = s.pins.read(channel)?;
                let payload = format_status(
                    s.device_id,
                    ObjectType::BinaryInput,
                    command.object_identifier,
                    value,
                );
                s.publisher
                    .publish(&reply_topic, &payload, STATUS_QOS, STATUS_RETAIN);
                Ok(Some(Reply {
                    topic: reply_topic,
                    payload,
                }))
            }
        }
    }

    /// Run a command and log the outcome; nothing escapes.
    fn dispatch(&self, topic: &str, command: &CommandMessage) {
        match self.handle_command(topic, command) {
            Ok(Some(reply)) => debug!("CMD {} -> {} '{}'", topic, reply.topic, reply.payload),
            Ok(None) => debug!("CMD {}: no change", topic),
            Err(e @ Error::Config(_)) => error!("CMD {}: {}", topic, e),
            Err(e) => warn!("CMD {}: {} ({:?})", topic, e, command),
        }
    }
}

impl MessageHandler for Router {
    fn on_message(&self, topic: &str, payload: &[u8]) {
        let command = match self.accept(payload) {
            Ok(c) => c,
            Err(e) => {
                debug!("MSG {}: dropped, {}", topic, e);
                return;
            }
        };

        let router = self.clone();
        let topic = topic.to_owned();
        let spawned = task_pin::spawn_on_core(
            Core::App,
            COMMAND_TASK_PRIORITY,
            COMMAND_TASK_STACK_KB,
            "cmd\0",
            move || router.dispatch(&topic, &command),
        );
        if let Err(e) = spawned {
            warn!("MSG: could not start command task: {}", e);
        }
    }
}
