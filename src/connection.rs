//! Bus connection manager — owns the broker session and its lifecycle.
//!
//! ```text
//!                 connect ok + all subscribed
//!   Disconnected ─────────▶ Connecting ─────────▶ Connected
//!        ▲                      │ refused: wait reconnect_delay
//!        │                      │ other:   wait retry_delay
//!        └──────────────────────┘                 │
//!        ▲                                        │ drop / recv error
//!        └────────────────────────────────────────┘
//!
//!   stop() from any state ─────▶ Stopped (terminal)
//! ```
//!
//! Subscriptions are renewed after every successful connect and before the
//! first inbound message of that session is handed to the router, so a
//! reconnect never delivers a message to a half-subscribed session.
//!
//! Publishers get a cloneable [`Session`] handle that drops messages with a
//! log line while the session is down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::app::ports::{MessageHandler, MqttTransport, QoS, StatusPublisher, TransportEvent};
use crate::config::BridgeConfig;
use crate::error::{ConfigError, ConnectionError};

/// Upper bound on one blocking receive; also the stop-request latency.
const RECV_WAIT: Duration = Duration::from_millis(200);
/// Back-off after a connect error other than an outright refusal.
const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Granularity of interruptible back-off sleeps.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Stopped = 3,
}

impl SessionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Stopped,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub topics: Vec<String>,
    /// Subscription QoS.
    pub qos: QoS,
    pub reconnect_delay: Duration,
    pub retry_delay: Duration,
}

impl ConnectionSettings {
    pub fn from_config(cfg: &BridgeConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            topics: cfg.subscribe.clone(),
            qos: QoS::from_level(cfg.qos).ok_or(ConfigError::Invalid("qos must be 0, 1 or 2"))?,
            reconnect_delay: Duration::from_millis(u64::from(cfg.reconnect_delay_ms)),
            retry_delay: RETRY_DELAY,
        })
    }
}

struct Inner {
    transport: Arc<dyn MqttTransport>,
    settings: ConnectionSettings,
    state: AtomicU8,
    shutdown: Arc<AtomicBool>,
}

impl Inner {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `to` unless already stopped.
    fn transition(&self, to: SessionState) {
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                (s != SessionState::Stopped as u8).then_some(to as u8)
            });
    }

    fn stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn stop(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) && self.state() == SessionState::Stopped {
            return;
        }
        self.state.store(SessionState::Stopped as u8, Ordering::Release);
        self.transport.disconnect();
        info!("MQTT: stopped");
    }

    /// Sleep for `total`, returning early on stop.
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.stopped() {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(PAUSE_SLICE));
        }
    }
}

/// Disconnects on every exit path out of [`ConnectionManager::run`].  A
/// raised shutdown flag ends in `Stopped` even if `stop()` was never called.
struct SessionGuard<'a>(&'a Inner);

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.transport.disconnect();
        if self.0.stopped() {
            self.0.state.store(SessionState::Stopped as u8, Ordering::Release);
        } else {
            self.0.transition(SessionState::Disconnected);
        }
    }
}

pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// `shutdown` is shared with every other long-running task; raising it
    /// (or calling [`stop`](Self::stop)) ends [`run`](Self::run).
    pub fn new(
        transport: Arc<dyn MqttTransport>,
        settings: ConnectionSettings,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                settings,
                state: AtomicU8::new(SessionState::Disconnected as u8),
                shutdown,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Publishing handle for pollers and command tasks.
    pub fn session(&self) -> Session {
        Session {
            inner: self.inner.clone(),
        }
    }

    /// Handle for stopping the loop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            inner: self.inner.clone(),
        }
    }

    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Drive the session until stopped.  Never returns an error: every
    /// failure is logged and retried.
    pub fn run(&self, handler: &dyn MessageHandler) {
        let inner = &*self.inner;
        let _guard = SessionGuard(inner);
        info!("MQTT: connection loop started");

        while !inner.stopped() {
            match self.establish() {
                Ok(()) => self.receive(handler),
                Err(ConnectionError::Refused) => {
                    warn!(
                        "MQTT: connection refused, retrying in {:?}",
                        inner.settings.reconnect_delay
                    );
                    inner.pause(inner.settings.reconnect_delay);
                }
                Err(e) => {
                    error!("MQTT: {}, retrying in {:?}", e, inner.settings.retry_delay);
                    inner.pause(inner.settings.retry_delay);
                }
            }
        }
        info!("MQTT: connection loop finished");
    }

    /// Connect and renew every subscription.  Only then is the session
    /// marked connected.
    fn establish(&self) -> Result<(), ConnectionError> {
        let inner = &*self.inner;
        inner.transition(SessionState::Connecting);

        if let Err(e) = inner.transport.connect() {
            inner.transition(SessionState::Disconnected);
            return Err(e);
        }

        for topic in &inner.settings.topics {
            if let Err(e) = inner.transport.subscribe(topic, inner.settings.qos) {
                warn!("MQTT: subscribe '{}' failed: {}", topic, e);
                inner.transport.disconnect();
                inner.transition(SessionState::Disconnected);
                return Err(ConnectionError::SubscribeFailed);
            }
            debug!("MQTT: subscribed '{}'", topic);
        }

        inner.transition(SessionState::Connected);
        info!(
            "MQTT: connected, {} topic(s) subscribed",
            inner.settings.topics.len()
        );
        Ok(())
    }

    /// Route messages until the session drops or a stop is requested.
    fn receive(&self, handler: &dyn MessageHandler) {
        let inner = &*self.inner;
        while !inner.stopped() {
            match inner.transport.recv(RECV_WAIT) {
                Ok(None) => {}
                Ok(Some(TransportEvent::Message { topic, payload })) => {
                    handler.on_message(&topic, &payload);
                }
                Ok(Some(TransportEvent::Disconnected)) => {
                    warn!("MQTT: session dropped by broker");
                    break;
                }
                Err(e) => {
                    warn!("MQTT: {}", e);
                    break;
                }
            }
        }
        inner.transport.disconnect();
        inner.transition(SessionState::Disconnected);
    }
}

/// Cloneable publishing handle.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn is_connected(&self) -> bool {
        self.inner.state() == SessionState::Connected
    }
}

impl StatusPublisher for Session {
    fn publish(&self, topic: &str, payload: &str, qos: QoS, retain: bool) {
        if !self.is_connected() {
            debug!("MQTT: not connected, dropped '{}' on {}", payload, topic);
            return;
        }
        if let Err(e) = self
            .inner
            .transport
            .publish(topic, payload.as_bytes(), qos, retain)
        {
            warn!("MQTT: publish to {} failed: {}", topic, e);
        }
    }
}

#[derive(Clone)]
pub struct StopHandle {
    inner: Arc<Inner>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.inner.stop();
    }
}
