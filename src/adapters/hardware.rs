//! Hardware adapter — expander bank behind the [`PinPort`] trait.
//!
//! This is the only module that knows about electrical polarity.  The rule
//! is the same for both roles:
//!
//! ```text
//!   every channel is active-low:   logical = !physical_bit
//!
//!   input  pin pulled low by a closed contact  → reads true
//!   output relay energised by sinking the pin  ← written true
//! ```
//!
//! Output writes are read-modify-write on a shadow latch per bus rather
//! than on the pin levels read back from the device, so an externally
//! loaded pin can never leak into its neighbours' state.
//!
//! At construction input buses are released (all ones) for their pull-ups
//! and output buses are driven to their configured rest states.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, PoisonError};

use embedded_hal::i2c::{Error as I2cError, I2c};
use log::{info, warn};

use crate::addressing::{Channel, PINS_PER_BUS};
use crate::app::ports::PinPort;
use crate::drivers::expander::{ALL_RELEASED, ExpanderBank, pin_mask};
use crate::error::HardwareError;
use crate::registry::{BusRole, ChannelRegistry};

struct State<I2C> {
    bank: ExpanderBank<I2C>,
    /// Last byte written to each output expander.
    latches: BTreeMap<u8, u8>,
}

/// Concrete [`PinPort`] over one I²C bus of expanders.
pub struct ExpanderPins<I2C> {
    state: Mutex<State<I2C>>,
    inputs: BTreeSet<u8>,
}

/// Physical bit for a logical value.
const fn to_bit(logical: bool) -> bool {
    !logical
}

/// Logical value for a physical bit.
const fn to_logical(bit: bool) -> bool {
    !bit
}

fn transfer_error<E: I2cError>(bus: u8, e: &E) -> HardwareError {
    warn!("HW bus {}: I2C {:?}", bus, e.kind());
    HardwareError::Transfer { bus }
}

impl<I2C: I2c + Send> ExpanderPins<I2C> {
    /// Take ownership of the bus and initialise every configured expander.
    pub fn new(i2c: I2C, registry: &ChannelRegistry) -> Result<Self, HardwareError> {
        let mut bank = ExpanderBank::new(i2c);
        let inputs: BTreeSet<u8> = registry.input_buses().collect();
        let mut latches = BTreeMap::new();

        for &bus in &inputs {
            bank.write_port(bus, ALL_RELEASED)
                .map_err(|e| transfer_error(bus, &e))?;
        }

        for bus in registry.output_buses() {
            let mut bits = 0u8;
            for pin in 0..PINS_PER_BUS {
                if to_bit(registry.rest_state(Channel { bus, pin })) {
                    bits |= pin_mask(pin);
                }
            }
            bank.write_port(bus, bits)
                .map_err(|e| transfer_error(bus, &e))?;
            latches.insert(bus, bits);
        }

        info!(
            "HW: {} input and {} output expanders initialised",
            inputs.len(),
            latches.len()
        );

        Ok(Self {
            state: Mutex::new(State { bank, latches }),
            inputs,
        })
    }

    fn role(&self, bus: u8, state: &State<I2C>) -> Option<BusRole> {
        if self.inputs.contains(&bus) {
            Some(BusRole::Input)
        } else if state.latches.contains_key(&bus) {
            Some(BusRole::Output)
        } else {
            None
        }
    }
}

impl<I2C: I2c + Send> PinPort for ExpanderPins<I2C> {
    fn read(&self, channel: Channel) -> Result<bool, HardwareError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.role(channel.bus, &state).is_none() {
            return Err(HardwareError::NotConfigured { bus: channel.bus });
        }
        let port = state
            .bank
            .read_port(channel.bus)
            .map_err(|e| transfer_error(channel.bus, &e))?;
        Ok(to_logical(port & pin_mask(channel.pin) != 0))
    }

    fn write(&self, channel: Channel, value: bool) -> Result<(), HardwareError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match self.role(channel.bus, &state) {
            None => return Err(HardwareError::NotConfigured { bus: channel.bus }),
            Some(BusRole::Input) => return Err(HardwareError::ReadOnly { bus: channel.bus }),
            Some(BusRole::Output) => {}
        }
        let latch = state.latches.get(&channel.bus).copied().unwrap_or(ALL_RELEASED);
        let next = if to_bit(value) {
            latch | pin_mask(channel.pin)
        } else {
            latch & !pin_mask(channel.pin)
        };
        state
            .bank
            .write_port(channel.bus, next)
            .map_err(|e| transfer_error(channel.bus, &e))?;
        state.latches.insert(channel.bus, next);
        Ok(())
    }
}
