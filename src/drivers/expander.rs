//! 8-bit quasi-bidirectional I²C port expander bank (PCF8574 class).
//!
//! One I²C bus carries several expanders, each at its own 7-bit address.
//! The device protocol is a single byte in each direction:
//!
//! - **write** one byte: each `1` bit releases the pin (weak pull-up, usable
//!   as an input), each `0` bit sinks current (drives the pin low).
//! - **read** one byte: the current level of all eight pins.
//!
//! This driver is a dumb byte mover.  Pin roles, polarity and latch
//! bookkeeping live in the hardware adapter.

use embedded_hal::i2c::I2c;

/// Byte that releases every pin for input use.
pub const ALL_RELEASED: u8 = 0xFF;

pub struct ExpanderBank<I2C> {
    i2c: I2C,
}

impl<I2C: I2c> ExpanderBank<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Read the pin levels of the expander at `address`.
    pub fn read_port(&mut self, address: u8) -> Result<u8, I2C::Error> {
        let mut buf = [0u8; 1];
        self.i2c.read(address, &mut buf)?;
        Ok(buf[0])
    }

    /// Write the output latch of the expander at `address`.
    pub fn write_port(&mut self, address: u8, bits: u8) -> Result<(), I2C::Error> {
        self.i2c.write(address, &[bits])
    }

    #[cfg(test)]
    fn release(self) -> I2C {
        self.i2c
    }
}

/// Bit mask for `pin` within a port byte.
pub const fn pin_mask(pin: u8) -> u8 {
    1 << pin
}
