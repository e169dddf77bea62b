//! Application core — bridge logic behind port traits.
//!
//! Command decoding, output handling with read-back verification, input
//! polling and message routing.  Everything touches hardware and the
//! broker only through the traits in [`ports`], so the whole layer runs
//! against mocks on the host.

pub mod commands;
pub mod output;
pub mod poller;
pub mod ports;
pub mod router;
