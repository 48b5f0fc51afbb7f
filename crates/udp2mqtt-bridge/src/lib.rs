//! udp2mqtt bridge library
//!
//! Connects a LAN of multicast-speaking gateways to an MQTT broker:
//! - Device registry seeded from the allow-list and grown by discovery
//! - Inbound routing of multicast reports to the telemetry topic
//! - Outbound routing of broker commands with secure-key substitution
//! - MQTT and multicast transports behind small traits

pub mod registry;
pub mod router;
pub mod transport;
pub mod worker;
