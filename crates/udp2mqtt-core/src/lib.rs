//! `udp2mqtt` Core Library
//!
//! Shared functionality for the bridge:
//! - Bridge configuration (broker, multicast, queues)
//! - Device allow-list file loading
//! - Tracing initialisation
//! - Common error types

pub mod allow_list;
pub mod config;
pub mod error;
pub mod tracing_init;

pub use allow_list::AllowList;
pub use config::{BridgeConfig, BrokerConfig, MulticastConfig, Qos};
pub use error::{Error, Result};
