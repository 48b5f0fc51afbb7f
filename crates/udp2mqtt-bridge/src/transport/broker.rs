//! MQTT side of the bridge, built on `rumqttc`.
//!
//! The client library owns reconnection and keep-alive. This module turns the
//! bridge configuration into connection options, publishes telemetry, and
//! drives the event loop that feeds command messages into the outbound queue.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use udp2mqtt_core::{BrokerConfig, Qos};

use super::{BrokerPublisher, RetryPolicy, TransportError};

/// Capacity of the client's internal request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 64;

pub const fn to_mqtt_qos(qos: Qos) -> QoS {
    match qos {
        Qos::AtMostOnce => QoS::AtMostOnce,
        Qos::AtLeastOnce => QoS::AtLeastOnce,
        Qos::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Connection options for the configured broker.
pub fn mqtt_options(config: &BrokerConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(config.clean_session);
    if let Some((user, pass)) = config.credentials() {
        options.set_credentials(user, pass);
    }
    options
}

/// Telemetry publisher backed by the MQTT client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
}

impl MqttPublisher {
    pub const fn new(client: AsyncClient) -> Self {
        Self { client }
    }

    pub const fn client(&self) -> &AsyncClient {
        &self.client
    }
}

impl BrokerPublisher for MqttPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: Qos,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.client
            .publish(topic, to_mqtt_qos(qos), retain, payload.to_vec())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

/// Create the client and its event loop. Nothing is sent until the loop is
/// polled.
pub fn connect(config: &BrokerConfig) -> (MqttPublisher, EventLoop) {
    let (client, event_loop) = AsyncClient::new(mqtt_options(config), REQUEST_CHANNEL_CAPACITY);
    (MqttPublisher::new(client), event_loop)
}

/// Poll until the broker acknowledges the connection.
///
/// Used at startup so an unreachable broker stops the process instead of
/// silently retrying in the background.
pub async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(session_present = ack.session_present, "Connected to broker");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => return Err(TransportError::Connect(e.to_string())),
        }
    }
}

/// Where command messages come from and where they go.
pub struct CommandSubscription {
    pub client: AsyncClient,
    pub topic: String,
    pub qos: Qos,
}

impl CommandSubscription {
    /// Subscribe through the request channel, waiting for room in it.
    pub async fn subscribe(&self) -> Result<(), TransportError> {
        self.client
            .subscribe(self.topic.as_str(), to_mqtt_qos(self.qos))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))
    }

    /// Subscribe from inside the event loop, where waiting on the request
    /// channel would stall the loop that drains it.
    fn resubscribe(&self) {
        if let Err(e) = self
            .client
            .try_subscribe(self.topic.as_str(), to_mqtt_qos(self.qos))
        {
            warn!(topic = %self.topic, error = %e, "Failed to renew command subscription");
        } else {
            debug!(topic = %self.topic, "Command subscription renewed");
        }
    }
}

/// Drive the broker connection and push every received command into the
/// outbound queue.
///
/// Enqueueing waits when the queue is full, so a slow multicast side holds
/// back the broker connection rather than dropping commands. Returns when the
/// outbound queue is closed.
pub async fn run_event_loop(
    mut event_loop: EventLoop,
    subscription: CommandSubscription,
    commands: mpsc::Sender<String>,
    policy: RetryPolicy,
) {
    let mut consecutive_errors: u32 = 0;

    loop {
        match event_loop.poll().await {
            Ok(event) => {
                if consecutive_errors > 0 {
                    info!("Broker connection restored");
                    consecutive_errors = 0;
                }
                match event {
                    Event::Incoming(Packet::ConnAck(_)) => subscription.resubscribe(),
                    Event::Incoming(Packet::Publish(publish)) => {
                        let Ok(message) = String::from_utf8(publish.payload.to_vec()) else {
                            debug!(topic = %publish.topic, "Dropping non UTF-8 command");
                            continue;
                        };
                        if commands.send(message).await.is_err() {
                            info!("Outbound queue closed, stopping broker event loop");
                            return;
                        }
                    }
                    _ => {}
                }
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(consecutive_errors);
                consecutive_errors = consecutive_errors.saturating_add(1);
                warn!(
                    error = %e,
                    consecutive_errors,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Broker connection error"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
