//! ESP-IDF MQTT client behind the [`MqttTransport`] trait.
//!
//! `EspMqttClient` delivers events on a connection object that has to be
//! drained continuously.  A pump thread per session does that and forwards
//! what matters into a bounded channel:
//!
//! ```text
//!   EspMqttConnection::next() ──▶ pump ──▶ sync_channel ──▶ connect() / recv()
//! ```
//!
//! Session lifecycle events are never dropped: the pump blocks until they
//! are queued.  Only inbound messages are shed when the queue is full.  A
//! `Connected` arriving mid-session means the client reconnected on its own
//! with a clean broker session, so `recv` reports it as a drop and the
//! connection manager re-subscribes.
//!
//! `disconnect()` drops the receiver and then the client, which ends the
//! connection iterator and with it the pump.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use esp_idf_svc::mqtt::client::{
    EspMqttClient, EspMqttConnection, EventPayload, MqttClientConfiguration, QoS as EspQoS,
};
use log::{debug, info, warn};

use crate::app::ports::{MqttTransport, QoS, TransportEvent};
use crate::config::BrokerConfig;
use crate::drivers::task_pin::{self, Core};
use crate::error::ConnectionError;

const EVENT_QUEUE_DEPTH: usize = 16;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PUMP_PRIORITY: u8 = 8;
const PUMP_STACK_KB: usize = 6;

enum PumpEvent {
    Connected,
    Refused,
    Disconnected,
    Message { topic: String, payload: Vec<u8> },
}

/// Client and event queue are locked separately so a blocked `recv` never
/// holds up publishers.
pub struct EspMqttTransport {
    broker: BrokerConfig,
    client: Mutex<Option<EspMqttClient<'static>>>,
    events: Mutex<Option<Receiver<PumpEvent>>>,
}

fn esp_qos(qos: QoS) -> EspQoS {
    match qos {
        QoS::AtMostOnce => EspQoS::AtMostOnce,
        QoS::AtLeastOnce => EspQoS::AtLeastOnce,
        QoS::ExactlyOnce => EspQoS::ExactlyOnce,
    }
}

fn forward(tx: &SyncSender<PumpEvent>, event: PumpEvent) {
    match event {
        PumpEvent::Message { .. } => {
            if let Err(TrySendError::Full(_)) = tx.try_send(event) {
                warn!("MQTT: event queue full, dropping message");
            }
        }
        // The receiver is gone only after disconnect().
        lifecycle => {
            let _ = tx.send(lifecycle);
        }
    }
}

fn pump(mut connection: EspMqttConnection, tx: SyncSender<PumpEvent>) {
    while let Ok(event) = connection.next() {
        match event.payload() {
            EventPayload::Connected(_) => forward(&tx, PumpEvent::Connected),
            EventPayload::Disconnected => forward(&tx, PumpEvent::Disconnected),
            EventPayload::Error(e) => {
                warn!("MQTT: client error {:?}", e);
                forward(&tx, PumpEvent::Refused);
            }
            EventPayload::Received {
                topic: Some(topic),
                data,
                ..
            } => forward(
                &tx,
                PumpEvent::Message {
                    topic: topic.to_owned(),
                    payload: data.to_vec(),
                },
            ),
            other => debug!("MQTT: {:?}", other),
        }
    }
    debug!("MQTT: event pump finished");
}

impl EspMqttTransport {
    pub fn new(broker: BrokerConfig) -> Self {
        Self {
            broker,
            client: Mutex::new(None),
            events: Mutex::new(None),
        }
    }

    fn client(&self) -> MutexGuard<'_, Option<EspMqttClient<'static>>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn events(&self) -> MutexGuard<'_, Option<Receiver<PumpEvent>>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MqttTransport for EspMqttTransport {
    fn connect(&self) -> Result<(), ConnectionError> {
        self.disconnect();

        let conf = MqttClientConfiguration {
            client_id: self.broker.client_id.as_deref(),
            username: self.broker.username.as_deref(),
            password: self.broker.password.as_deref(),
            ..Default::default()
        };
        let url = self.broker.url();
        info!("MQTT: connecting to {}", url);
        let (client, connection) = EspMqttClient::new(&url, &conf).map_err(|e| {
            warn!("MQTT: client init failed: {}", e);
            ConnectionError::Failed
        })?;

        let (tx, events) = mpsc::sync_channel(EVENT_QUEUE_DEPTH);
        task_pin::spawn_on_core(Core::Pro, PUMP_PRIORITY, PUMP_STACK_KB, "mqtt_rx\0", move || {
            pump(connection, tx);
        })
        .map_err(|e| {
            warn!("MQTT: event pump not started: {}", e);
            ConnectionError::Failed
        })?;

        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match events.recv_timeout(left) {
                Ok(PumpEvent::Connected) => break,
                Ok(PumpEvent::Refused) => return Err(ConnectionError::Refused),
                Ok(_) => {}
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    return Err(ConnectionError::Failed);
                }
            }
        }

        *self.client() = Some(client);
        *self.events() = Some(events);
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ConnectionError> {
        let mut guard = self.client();
        let client = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        client
            .subscribe(topic, esp_qos(qos))
            .map(|_| ())
            .map_err(|_| ConnectionError::SubscribeFailed)
    }

    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), ConnectionError> {
        let mut guard = self.client();
        let client = guard.as_mut().ok_or(ConnectionError::NotConnected)?;
        client
            .enqueue(topic, esp_qos(qos), retain, payload)
            .map(|_| ())
            .map_err(|_| ConnectionError::PublishFailed)
    }

    fn recv(&self, wait: Duration) -> Result<Option<TransportEvent>, ConnectionError> {
        let guard = self.events();
        let events = guard.as_ref().ok_or(ConnectionError::NotConnected)?;
        match events.recv_timeout(wait) {
            Ok(PumpEvent::Message { topic, payload }) => {
                Ok(Some(TransportEvent::Message { topic, payload }))
            }
            Ok(PumpEvent::Disconnected | PumpEvent::Refused) => {
                Ok(Some(TransportEvent::Disconnected))
            }
            Ok(PumpEvent::Connected) => {
                warn!("MQTT: client reconnected by itself, forcing a fresh session");
                Ok(Some(TransportEvent::Disconnected))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(ConnectionError::Lost),
        }
    }

    fn disconnect(&self) {
        self.events().take();
        let client = self.client().take();
        if client.is_some() {
            info!("MQTT: session closed");
        }
    }
}
