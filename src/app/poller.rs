//! Input poller — one self-pacing loop per input bus.
//!
//! Every cycle reads the eight channels in pin order and publishes one
//! status payload per channel, changed or not.  The cycle then sleeps for
//! 90 % of whatever is left of the nominal interval:
//!
//! ```text
//!   sleep = max(0, interval - elapsed) * 0.9
//!
//!   interval 10, pass 3  ──▶ 6.3
//!   interval 10, pass 12 ──▶ 0
//! ```
//!
//! Running slightly fast keeps a systematic overrun (slow I²C, a busy
//! broker) from stretching the period.  Pollers share nothing mutable with
//! each other or with command handling except the hardware port itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::addressing::{Channel, PINS_PER_BUS};
use crate::error::Result;
use crate::registry::ChannelRegistry;

use super::commands::{ObjectType, STATUS_QOS, STATUS_RETAIN, format_status};
use super::ports::{PinPort, StatusPublisher};

/// Longest a stopping poller keeps sleeping.
const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

/// Sleep after a poll pass that took `elapsed` out of `interval`.
pub fn pacing_sleep(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed) * 9 / 10
}

pub struct InputPoller {
    bus: u8,
    interval: Duration,
    device_id: i64,
    registry: Arc<ChannelRegistry>,
    pins: Arc<dyn PinPort>,
    publisher: Arc<dyn StatusPublisher>,
    shutdown: Arc<AtomicBool>,
}

impl InputPoller {
    /// Fails if `bus` is not a configured input bus.
    pub fn new(
        bus: u8,
        device_id: i64,
        registry: Arc<ChannelRegistry>,
        pins: Arc<dyn PinPort>,
        publisher: Arc<dyn StatusPublisher>,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Self> {
        let interval = registry.interval_for(bus)?;
        Ok(Self {
            bus,
            interval,
            device_id,
            registry,
            pins,
            publisher,
            shutdown,
        })
    }

    /// One pass over the bus.  Returns the number of payloads published.
    ///
    /// A channel whose read fails is skipped for this pass only.
    pub fn poll_once(&self) -> usize {
        let mut published = 0;
        for pin in 0..PINS_PER_BUS {
            let channel = Channel { bus: self.bus, pin };
            let value = match self.pins.read(channel) {
                Ok(v) => v,
                Err(e) => {
                    warn!("POLL {}: {}", channel, e);
                    continue;
                }
            };
            let topic = match self.registry.topic_for(channel) {
                Ok(t) => t,
                Err(e) => {
                    warn!("POLL {}: {}", channel, e);
                    continue;
                }
            };
            let payload = format_status(
                self.device_id,
                ObjectType::BinaryInput,
                i64::from(channel.identifier()),
                value,
            );
            self.publisher
                .publish(topic, &payload, STATUS_QOS, STATUS_RETAIN);
            published += 1;
        }
        published
    }

    /// Poll until the shutdown flag is raised.
    pub fn run(&self) {
        info!("POLL bus {}: started, interval {:?}", self.bus, self.interval);
        while !self.shutdown.load(Ordering::Acquire) {
            let started = Instant::now();
            let published = self.poll_once();
            let sleep = pacing_sleep(self.interval, started.elapsed());
            debug!("POLL bus {}: {} published, next in {:?}", self.bus, published, sleep);
            self.pause(sleep);
        }
        info!("POLL bus {}: stopped", self.bus);
    }

    /// Sleep for `total`, waking early on shutdown.
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.shutdown.load(Ordering::Acquire) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            std::thread::sleep(left.min(SHUTDOWN_CHECK));
        }
    }
}
