//! Fuzz target: inbound command decoding.
//!
//! Arbitrary broker payloads go through the same path as `on_message`:
//! lossy UTF-8, JSON with raw-text fallback, envelope extraction.  Nothing
//! may panic, and any accepted command must format into a status payload
//! that fits its fixed buffer.
//!
//! cargo fuzz run fuzz_command_decode

#![no_main]

use iobridge::app::commands::{ObjectType, decode_payload, format_status, parse_command};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(cmd) = parse_command(decode_payload(data)) {
        let _ = cmd.requested_state();
        if let Ok(kind) = ObjectType::from_code(cmd.object_type) {
            let payload =
                format_status(cmd.device_id, kind, cmd.object_identifier, cmd.requested_state());
            assert_eq!(payload.split(' ').count(), 4, "status payload must have four fields");
        }
    }
});
