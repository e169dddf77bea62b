//! Fuzz target: identifier → (bus, pin).
//!
//! Any accepted identifier must name a real pin and re-encode to itself.
//!
//! cargo fuzz run fuzz_identifier_decode

#![no_main]

use iobridge::addressing::{PINS_PER_BUS, decode, encode};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|identifier: i64| {
    if let Ok(ch) = decode(identifier) {
        assert!(ch.pin < PINS_PER_BUS, "decoded pin out of range");
        assert_eq!(i64::from(encode(ch.bus, ch.pin)), identifier);
    }
});
