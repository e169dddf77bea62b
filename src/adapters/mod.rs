//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements     | Connects to                      |
//! |------------|----------------|----------------------------------|
//! | `hardware` | PinPort        | PCF8574-class expanders over I²C |
//! | `hw_guard` | PinPort        | any PinPort, with a deadline     |
//! | `mqtt`     | MqttTransport  | ESP-IDF MQTT client              |
//! | `wifi`     | —              | ESP-IDF Wi-Fi station            |

pub mod hardware;
pub mod hw_guard;
#[cfg(target_os = "espidf")]
pub mod mqtt;
pub mod wifi;
