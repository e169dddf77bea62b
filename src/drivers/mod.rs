//! Peripheral drivers and task helpers.

pub mod expander;
pub mod task_pin;
