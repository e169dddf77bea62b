//! Mock adapters for integration tests.
//!
//! - [`MockBus`]: an `embedded_hal` I²C bus of PCF8574-style expanders,
//!   shared through a handle so tests can pull inputs low after the bus has
//!   been moved into the hardware adapter.
//! - [`CapturePublisher`]: records every publish.
//! - [`ScriptedTransport`]: an MQTT transport driven by a per-session
//!   script, logging every operation into a shared [`OpLog`].

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};
use iobridge::app::ports::{MessageHandler, MqttTransport, QoS, StatusPublisher, TransportEvent};
use iobridge::config::BridgeConfig;
use iobridge::error::ConnectionError;
use iobridge::registry::ChannelRegistry;

// ── Shared configuration ──────────────────────────────────────

pub const DEVICE_ID: i64 = 1001;

/// Input bus 37 (pin 1 has its own topic), input bus 38, pulse output bus
/// 32 resting off, latched output bus 33.
pub fn bridge_config() -> BridgeConfig {
    BridgeConfig::from_json(
        r#"{
            "device_id": 1001,
            "broker": { "host": "broker.local", "client_id": "bridge-1001" },
            "subscribe": ["Site_1/Set/1001/value", "Site_1/Set/1001/poll"],
            "input_buses": [
                { "address": 37, "interval_ms": 5000, "topic": "Site_1/Site/1001/in37",
                  "pin_topics": { "1": "Site_1/Site/1001/door" } },
                { "address": 38, "interval_ms": 2000, "topic": "Site_1/Site/1001/in38" }
            ],
            "output_buses": [
                { "address": 32, "delay_ms": 60, "default": false },
                { "address": 33 }
            ]
        }"#,
    )
    .unwrap()
}

pub fn registry() -> Arc<ChannelRegistry> {
    Arc::new(ChannelRegistry::from_config(&bridge_config()).unwrap())
}

// ── MockBus ───────────────────────────────────────────────────

#[derive(Default)]
pub struct BusState {
    /// Last byte written per address.
    pub latch: BTreeMap<u8, u8>,
    /// Bits held low externally per address (closed contacts).
    pub pulled_low: BTreeMap<u8, u8>,
    /// Bits that read back high no matter what (a dead relay driver).
    pub stuck_high: BTreeMap<u8, u8>,
    /// Addresses that do not acknowledge.
    pub absent: BTreeSet<u8>,
    pub transactions: usize,
}

#[derive(Clone, Default)]
pub struct MockBus(pub Arc<Mutex<BusState>>);

#[allow(dead_code)]
impl MockBus {
    pub fn pull_low(&self, address: u8, pin: u8) {
        *self.0.lock().unwrap().pulled_low.entry(address).or_default() |= 1 << pin;
    }

    pub fn release(&self, address: u8, pin: u8) {
        *self.0.lock().unwrap().pulled_low.entry(address).or_default() &= !(1 << pin);
    }

    pub fn stick_high(&self, address: u8, pin: u8) {
        *self.0.lock().unwrap().stuck_high.entry(address).or_default() |= 1 << pin;
    }

    pub fn latch(&self, address: u8) -> Option<u8> {
        self.0.lock().unwrap().latch.get(&address).copied()
    }
}

impl ErrorType for MockBus {
    type Error = ErrorKind;
}

impl I2c for MockBus {
    fn transaction(&mut self, address: u8, ops: &mut [Operation<'_>]) -> Result<(), ErrorKind> {
        let mut s = self.0.lock().unwrap();
        s.transactions += 1;
        if s.absent.contains(&address) {
            return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
        }
        for op in ops {
            match op {
                Operation::Write(bytes) => {
                    s.latch.insert(address, bytes[0]);
                }
                Operation::Read(buf) => {
                    let latch = s.latch.get(&address).copied().unwrap_or(0xFF);
                    let low = s.pulled_low.get(&address).copied().unwrap_or(0);
                    let high = s.stuck_high.get(&address).copied().unwrap_or(0);
                    buf[0] = (latch & !low) | high;
                }
            }
        }
        Ok(())
    }
}

// ── CapturePublisher ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: QoS,
    pub retain: bool,
    pub at: Instant,
}

#[derive(Default)]
pub struct CapturePublisher {
    pub sent: Mutex<Vec<Published>>,
}

#[allow(dead_code)]
impl CapturePublisher {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|p| (p.topic.clone(), p.payload.clone()))
            .collect()
    }

    /// True when nothing was published retained or above QoS 0.
    pub fn all_transient(&self) -> bool {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .all(|p| p.qos == QoS::AtMostOnce && !p.retain)
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    /// Block until at least `n` messages were published or `timeout` ran out.
    pub fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.count() < n {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

impl StatusPublisher for CapturePublisher {
    fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) {
        self.sent.lock().unwrap().push(Published {
            topic: topic.to_owned(),
            payload: payload.to_owned(),
            qos,
            retain,
            at: Instant::now(),
        });
    }
}

// ── ScriptedTransport ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Connect,
    Refused,
    Subscribe(String),
    Publish(String, String),
    Dispatch(String),
    Disconnect,
}

pub type OpLog = Arc<Mutex<Vec<Op>>>;

/// One connect attempt's outcome and, if accepted, what the session
/// delivers before it idles.
pub enum Script {
    Refuse,
    Accept(Vec<TransportEvent>),
}

pub struct ScriptedTransport {
    pub log: OpLog,
    script: Mutex<VecDeque<Script>>,
    pending: Mutex<VecDeque<TransportEvent>>,
    connected: Mutex<bool>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new(log: OpLog, script: Vec<Script>) -> Self {
        Self {
            log,
            script: Mutex::new(script.into()),
            pending: Mutex::new(VecDeque::new()),
            connected: Mutex::new(false),
        }
    }

    pub fn connects(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|op| matches!(op, Op::Connect | Op::Refused))
            .count()
    }
}

impl MqttTransport for ScriptedTransport {
    fn connect(&self) -> Result<(), ConnectionError> {
        // Past the end of the script every connect succeeds and idles.
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Accept(Vec::new()));
        match next {
            Script::Refuse => {
                self.log.lock().unwrap().push(Op::Refused);
                Err(ConnectionError::Refused)
            }
            Script::Accept(events) => {
                self.log.lock().unwrap().push(Op::Connect);
                *self.pending.lock().unwrap() = events.into();
                *self.connected.lock().unwrap() = true;
                Ok(())
            }
        }
    }

    fn subscribe(&self, topic: &str, _: QoS) -> Result<(), ConnectionError> {
        self.log.lock().unwrap().push(Op::Subscribe(topic.to_owned()));
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], _: QoS, _: bool) -> Result<(), ConnectionError> {
        if !*self.connected.lock().unwrap() {
            return Err(ConnectionError::NotConnected);
        }
        self.log.lock().unwrap().push(Op::Publish(
            topic.to_owned(),
            String::from_utf8_lossy(payload).into_owned(),
        ));
        Ok(())
    }

    fn recv(&self, wait: Duration) -> Result<Option<TransportEvent>, ConnectionError> {
        if let Some(ev) = self.pending.lock().unwrap().pop_front() {
            return Ok(Some(ev));
        }
        std::thread::sleep(wait.min(Duration::from_millis(5)));
        Ok(None)
    }

    fn disconnect(&self) {
        let mut connected = self.connected.lock().unwrap();
        if *connected {
            self.log.lock().unwrap().push(Op::Disconnect);
        }
        *connected = false;
    }
}

/// Message handler that only records what it was given.
pub struct RecordingHandler {
    pub log: OpLog,
}

impl MessageHandler for RecordingHandler {
    fn on_message(&self, topic: &str, _payload: &[u8]) {
        self.log.lock().unwrap().push(Op::Dispatch(topic.to_owned()));
    }
}

/// Spin until `cond` holds; panics after five seconds.
#[allow(dead_code)]
pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}
