//! Transports on either side of the bridge.
//!
//! The routers only see the [`BrokerPublisher`] and [`DatagramSink`] traits;
//! the MQTT and multicast implementations live in the submodules.

pub mod broker;
pub mod multicast;

use std::future::Future;
use std::time::Duration;

use udp2mqtt_core::Qos;

pub use broker::MqttPublisher;
pub use multicast::MulticastSender;

/// Errors raised by either transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Broker publish failed: {0}")]
    Publish(String),

    #[error("Broker connection failed: {0}")]
    Connect(String),

    #[error("Datagram send failed: {0}")]
    Send(String),

    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Publishes messages to the broker.
pub trait BrokerPublisher: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Sends one datagram to the multicast group.
pub trait DatagramSink: Send + Sync {
    fn send_datagram(&self, payload: &[u8])
    -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Exponential backoff between consecutive transport failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on the delay.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each consecutive failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// Broker reconnects: 1s doubling up to 30s.
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Socket receive errors: 50ms doubling up to 5s.
    pub const fn socket_receive() -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }

    /// Delay before retrying after `attempt` consecutive failures
    /// (0-indexed).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.multiplier.powi(attempt.min(32) as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delays_are_capped() {
        let policy = RetryPolicy::default();

        // 1s, 2s, 4s, 8s, 16s, 30s (capped)
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(30));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn socket_receive_backoff_starts_short() {
        let policy = RetryPolicy::socket_receive();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(5));
    }
}
