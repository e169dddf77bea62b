//! Output command handler — write, optional pulse, verified by read-back.
//!
//! ```text
//!   requested == default ──▶ Unchanged (no write, no publish)
//!
//!   latched:  write(v) ─▶ read == v ? ─▶ confirmed(v)
//!   pulse:    write(v) ─▶ read == v ? ─▶ confirmed(v) ─▶ sleep(d) ─▶ write(!v) ─▶ read == !v ?
//! ```
//!
//! `confirmed` is the only point where the caller may publish, so a
//! published value is always one the hardware reported back.  The revert
//! half of a pulse is a physical action only and is never published.  It is
//! attempted up to `REVERT_ATTEMPTS` times; a failed operation has no
//! effect on the hardware, so each retry starts from the pulsed level.
//!
//! Each output channel has its own lock, held for the whole
//! write/verify/sleep/revert sequence.  Two commands to the same channel
//! run one after the other; commands to different channels never contend.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};

use crate::addressing::Channel;
use crate::error::{AddressingError, Result, VerificationMismatch};
use crate::registry::{BusRole, ChannelRegistry};

use super::ports::PinPort;

const REVERT_ATTEMPTS: u32 = 3;

/// Result of a successful [`OutputHandler::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// The request matched the rest state; nothing was written.
    Unchanged,
    /// The hardware confirmed this value (the pre-revert value for pulses).
    Confirmed(bool),
}

pub struct OutputHandler {
    registry: Arc<ChannelRegistry>,
    pins: Arc<dyn PinPort>,
    locks: BTreeMap<Channel, Mutex<()>>,
}

impl OutputHandler {
    pub fn new(registry: Arc<ChannelRegistry>, pins: Arc<dyn PinPort>) -> Self {
        let locks = registry
            .output_channels()
            .map(|ch| (ch, Mutex::new(())))
            .collect();
        Self {
            registry,
            pins,
            locks,
        }
    }

    /// Drive `channel` to `requested`.
    ///
    /// `on_confirmed` runs once, right after the first verified write and
    /// before any pulse delay.  It is not called for `Unchanged` or on error.
    pub fn set(
        &self,
        channel: Channel,
        requested: bool,
        on_confirmed: impl FnOnce(bool),
    ) -> Result<SetOutcome> {
        let Some(lock) = self.locks.get(&channel) else {
            return Err(match self.registry.role(channel.bus) {
                Some(BusRole::Input) => AddressingError::WrongRole { bus: channel.bus },
                _ => AddressingError::UnknownBus(channel.bus),
            }
            .into());
        };

        if self.registry.default_for(channel) == Some(requested) {
            debug!("OUT {}: {} is the rest state, no change", channel, u8::from(requested));
            return Ok(SetOutcome::Unchanged);
        }

        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.write_verified(channel, requested)?;
        on_confirmed(requested);

        let delay = self.registry.delay_for(channel);
        if delay > Duration::ZERO {
            info!("OUT {}: pulse {} for {:?}", channel, u8::from(requested), delay);
            std::thread::sleep(delay);
            self.revert(channel, !requested)?;
        }

        Ok(SetOutcome::Confirmed(requested))
    }

    fn revert(&self, channel: Channel, rest: bool) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.write_verified(channel, rest) {
                Ok(()) => return Ok(()),
                Err(e) if attempt < REVERT_ATTEMPTS => {
                    warn!("OUT {}: revert attempt {} failed: {}", channel, attempt, e);
                    attempt += 1;
                }
                Err(e) => {
                    warn!("OUT {}: still at {} after {} revert attempts", channel, u8::from(!rest), attempt);
                    return Err(e);
                }
            }
        }
    }

    fn write_verified(&self, channel: Channel, value: bool) -> Result<()> {
        self.pins.write(channel, value)?;
        let read = self.pins.read(channel)?;
        if read != value {
            let mismatch = VerificationMismatch {
                bus: channel.bus,
                pin: channel.pin,
                written: value,
                read,
            };
            warn!("OUT {}: {}", channel, mismatch);
            return Err(mismatch.into());
        }
        Ok(())
    }
}
