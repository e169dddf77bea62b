//! Channel addressing — identifier ⇄ (bus, pin).
//!
//! An identifier is the decimal number `bus * 100 + pin`: the bus index
//! (the expander's 7-bit I²C address written in decimal) occupies the
//! leading digits and the pin index the two trailing digits.
//!
//! ```text
//!   3701  →  bus 37, pin 01
//!   12707 →  bus 127, pin 07
//! ```

use crate::error::AddressingError;

/// Channels per expander bus.
pub const PINS_PER_BUS: u8 = 8;

/// Width of the pin field in decimal digits.
const PIN_DIGITS_DIVISOR: i64 = 100;

/// Highest 7-bit bus address.
pub const MAX_BUS: u8 = 127;

/// One addressable channel: pin `pin` on the expander at `bus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel {
    pub bus: u8,
    pub pin: u8,
}

impl Channel {
    /// The external identifier for this channel.
    pub fn identifier(self) -> u32 {
        encode(self.bus, self.pin)
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.bus, self.pin)
    }
}

/// Split an identifier into `(bus, pin)`.
pub fn decode(identifier: i64) -> Result<Channel, AddressingError> {
    if identifier < PIN_DIGITS_DIVISOR {
        return Err(AddressingError::Malformed(identifier));
    }
    let bus = identifier / PIN_DIGITS_DIVISOR;
    let pin = identifier % PIN_DIGITS_DIVISOR;
    if bus > i64::from(MAX_BUS) {
        return Err(AddressingError::Malformed(identifier));
    }
    if pin >= i64::from(PINS_PER_BUS) {
        return Err(AddressingError::PinOutOfRange {
            identifier,
            pin: pin as u8,
        });
    }
    Ok(Channel {
        bus: bus as u8,
        pin: pin as u8,
    })
}

/// Join `(bus, pin)` into an identifier. Inputs are assumed valid.
pub const fn encode(bus: u8, pin: u8) -> u32 {
    bus as u32 * PIN_DIGITS_DIVISOR as u32 + pin as u32
}
