//! Bridge configuration.
//!
//! Built once at startup from the command line and passed by reference to
//! the routers and transports. Nothing here is global.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use url::{Host, Url};

use crate::error::{Error, Result};

/// Default MQTT port when the broker URI omits one.
pub const DEFAULT_BROKER_PORT: u16 = 1883;

/// Multicast group the gateways announce on.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 50);

/// UDP port used for both gateway reports and commands.
pub const DEFAULT_MULTICAST_PORT: u16 = 9898;

/// Largest datagram read from the multicast socket.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// Capacity of each direction's message queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Broker delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl TryFrom<u8> for Qos {
    type Error = Error;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(Error::Config(format!(
                "QoS must be 0, 1 or 2, got {other}"
            ))),
        }
    }
}

/// Connection and topic settings for the MQTT broker.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Topic that receives every multicast report.
    pub telemetry_topic: String,
    /// Topic whose messages are forwarded to the multicast group.
    pub command_topic: String,
    pub qos: Qos,
    pub retain: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub clean_session: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.10".to_string(),
            port: DEFAULT_BROKER_PORT,
            client_id: "mqtt-proxy".to_string(),
            telemetry_topic: "stat/xiaomi".to_string(),
            command_topic: "cmd/xiaomi".to_string(),
            qos: Qos::AtMostOnce,
            retain: false,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(2),
            clean_session: false,
        }
    }
}

impl BrokerConfig {
    /// Username and password, only when both are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

/// Multicast group settings.
#[derive(Debug, Clone)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub max_datagram_size: usize,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_MULTICAST_PORT,
            max_datagram_size: MAX_DATAGRAM_SIZE,
        }
    }
}

impl MulticastConfig {
    /// Destination address for outbound datagrams.
    pub const fn group_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.group, self.port)
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub broker: BrokerConfig,
    pub multicast: MulticastConfig,
    /// Bounded capacity of the inbound and outbound queues.
    pub queue_capacity: usize,
    /// Emit an observation line for every contact-sensor report.
    pub log_contact_sensors: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            multicast: MulticastConfig::default(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            log_contact_sensors: false,
        }
    }
}

impl BridgeConfig {
    /// Reject values the transports cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue capacity must be at least 1".into()));
        }
        if !self.multicast.group.is_multicast() {
            return Err(Error::Config(format!(
                "{} is not a multicast address",
                self.multicast.group
            )));
        }
        if self.broker.telemetry_topic.is_empty() || self.broker.command_topic.is_empty() {
            return Err(Error::Config("broker topics must not be empty".into()));
        }
        Ok(())
    }
}

/// Split a broker URI into host and port.
///
/// Accepts `tcp://host:port`, `mqtt://host:port` or `host:port`; the port
/// defaults to 1883. IPv6 hosts are written in brackets and returned without
/// them. Credentials belong in `--user`/`--password`, so a URI carrying user
/// info is rejected.
pub fn parse_broker_uri(uri: &str) -> Result<(String, u16)> {
    let url = if uri.contains("://") {
        Url::parse(uri)
    } else {
        Url::parse(&format!("tcp://{uri}"))
    }
    .map_err(|e| Error::Config(format!("invalid broker URI {uri}: {e}")))?;

    if !matches!(url.scheme(), "tcp" | "mqtt") {
        return Err(Error::Config(format!(
            "unsupported broker scheme '{}' in {uri}",
            url.scheme()
        )));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(Error::Config(format!(
            "broker URI {uri} must not carry credentials, use --user/--password"
        )));
    }
    if !matches!(url.path(), "" | "/") || url.query().is_some() {
        return Err(Error::Config(format!(
            "broker URI {uri} must not have a path or query"
        )));
    }

    let host = match url.host() {
        Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        _ => return Err(Error::Config(format!("missing broker host in {uri}"))),
    };
    Ok((host, url.port().unwrap_or(DEFAULT_BROKER_PORT)))
}
