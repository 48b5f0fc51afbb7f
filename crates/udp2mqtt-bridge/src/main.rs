//! `udp2mqtt` bridge
//!
//! Republishes gateway multicast reports to an MQTT topic and forwards MQTT
//! commands back to the multicast group.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use udp2mqtt_bridge::registry::DeviceRegistry;
use udp2mqtt_bridge::router::{InboundRouter, OutboundRouter};
use udp2mqtt_bridge::transport::broker::{self, CommandSubscription};
use udp2mqtt_bridge::transport::multicast;
use udp2mqtt_bridge::transport::{MulticastSender, RetryPolicy};
use udp2mqtt_bridge::worker::{spawn_inbound_worker, spawn_outbound_worker};
use udp2mqtt_core::config::{
    DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_PORT, DEFAULT_QUEUE_CAPACITY, MAX_DATAGRAM_SIZE,
    parse_broker_uri,
};
use udp2mqtt_core::{AllowList, BridgeConfig, BrokerConfig, MulticastConfig, Qos};

/// Time given to the event loop to flush the disconnect on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "udp2mqtt")]
#[command(version, about = "udp2mqtt - bridge gateway multicast traffic to an MQTT broker")]
struct Args {
    /// Broker URI (`tcp://host:port`, `mqtt://host:port` or `host:port`)
    #[arg(long, default_value = "tcp://192.168.1.10:1883", env = "UDP2MQTT_BROKER")]
    broker: String,

    /// MQTT client id
    #[arg(long, default_value = "mqtt-proxy", env = "UDP2MQTT_CLIENT_ID")]
    id: String,

    /// Topic that receives every multicast report
    #[arg(long, default_value = "stat/xiaomi", env = "UDP2MQTT_TOPIC")]
    topic: String,

    /// Topic whose messages are sent to the multicast group
    #[arg(long, default_value = "cmd/xiaomi", env = "UDP2MQTT_SUBSCRIBE")]
    subscribe: String,

    /// MQTT QoS for publishing and subscribing (0, 1 or 2)
    #[arg(long, default_value_t = 0, env = "UDP2MQTT_QOS")]
    qos: u8,

    /// Publish reports with the retain flag set
    #[arg(long, env = "UDP2MQTT_RETAIN")]
    retain: bool,

    /// Broker username
    #[arg(long, env = "UDP2MQTT_USER")]
    user: Option<String>,

    /// Broker password
    #[arg(long, env = "UDP2MQTT_PASSWORD")]
    password: Option<String>,

    /// Start a clean MQTT session
    #[arg(long, env = "UDP2MQTT_CLEAN")]
    clean: bool,

    /// MQTT keep-alive in seconds
    #[arg(long, default_value_t = 2, env = "UDP2MQTT_KEEP_ALIVE")]
    keep_alive: u64,

    /// Device allow-list file (gateway passwords and display names)
    #[arg(long, default_value = "./devicelist.json", env = "UDP2MQTT_CFGFILE")]
    cfgfile: PathBuf,

    /// Multicast group the gateways report on
    #[arg(long, default_value_t = DEFAULT_MULTICAST_GROUP, env = "UDP2MQTT_MULTICAST_GROUP")]
    multicast_group: Ipv4Addr,

    /// Multicast port for reports and commands
    #[arg(long, default_value_t = DEFAULT_MULTICAST_PORT, env = "UDP2MQTT_MULTICAST_PORT")]
    multicast_port: u16,

    /// Capacity of each direction's message queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY, env = "UDP2MQTT_QUEUE_CAPACITY")]
    queue_capacity: usize,

    /// Log every contact-sensor report on the `udp2mqtt::contact` target
    #[arg(long, env = "UDP2MQTT_LOG_CONTACT_SENSORS")]
    log_contact_sensors: bool,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "UDP2MQTT_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "UDP2MQTT_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn bridge_config(&self) -> anyhow::Result<BridgeConfig> {
        let (host, port) = parse_broker_uri(&self.broker)?;
        let config = BridgeConfig {
            broker: BrokerConfig {
                host,
                port,
                client_id: self.id.clone(),
                telemetry_topic: self.topic.clone(),
                command_topic: self.subscribe.clone(),
                qos: Qos::try_from(self.qos)?,
                retain: self.retain,
                username: self.user.clone(),
                password: self.password.clone(),
                keep_alive: Duration::from_secs(self.keep_alive),
                clean_session: self.clean,
            },
            multicast: MulticastConfig {
                group: self.multicast_group,
                port: self.multicast_port,
                max_datagram_size: MAX_DATAGRAM_SIZE,
            },
            queue_capacity: self.queue_capacity,
            log_contact_sensors: self.log_contact_sensors,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    udp2mqtt_core::tracing_init::init_tracing(
        &udp2mqtt_core::tracing_init::default_filter(&args.log_level),
        args.log_json,
    );

    let config = args.bridge_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        client_id = %config.broker.client_id,
        topic = %config.broker.telemetry_topic,
        subscribe = %config.broker.command_topic,
        "Starting udp2mqtt"
    );

    // Allow-list
    let registry = match AllowList::load_optional(&args.cfgfile)? {
        Some(list) => {
            info!(path = %args.cfgfile.display(), "Loaded device allow-list");
            DeviceRegistry::from_allow_list(&list)
        }
        None => {
            info!(path = %args.cfgfile.display(), "No device allow-list, starting empty");
            DeviceRegistry::new()
        }
    };

    // Broker
    let (publisher, mut event_loop) = broker::connect(&config.broker);
    broker::wait_for_connack(&mut event_loop).await?;
    let subscription = CommandSubscription {
        client: publisher.client().clone(),
        topic: config.broker.command_topic.clone(),
        qos: config.broker.qos,
    };
    subscription.subscribe().await?;
    info!(topic = %subscription.topic, "Subscribed to command topic");

    // Multicast
    let receive_socket = multicast::bind_receiver(&config.multicast)?;
    let sender = MulticastSender::bind(&config.multicast).await?;

    // Queues and workers
    let (report_tx, report_rx) = mpsc::channel(config.queue_capacity);
    let (command_tx, command_rx) = mpsc::channel(config.queue_capacity);

    let inbound = Arc::new(InboundRouter::new(
        registry.clone(),
        publisher.clone(),
        &config,
    ));
    let outbound = Arc::new(OutboundRouter::new(registry.clone(), sender));
    let inbound_worker = spawn_inbound_worker(inbound, report_rx);
    let outbound_worker = spawn_outbound_worker(outbound, command_rx);

    let receiver = tokio::spawn(multicast::run_receiver(
        receive_socket,
        config.multicast.max_datagram_size,
        report_tx,
        RetryPolicy::socket_receive(),
    ));
    let mut broker_loop = tokio::spawn(broker::run_event_loop(
        event_loop,
        subscription,
        command_tx,
        RetryPolicy::default(),
    ));

    info!(
        group = %config.multicast.group,
        port = config.multicast.port,
        "Bridge running"
    );

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C shutdown signal");
        }
        _ = sigterm_future => {
            info!("Received SIGTERM shutdown signal");
        }
    }

    // Finish publishing queued reports before leaving the broker.
    receiver.abort();
    if let Err(e) = inbound_worker.await {
        warn!(error = %e, "Inbound worker ended abnormally");
    }
    if let Err(e) = publisher.client().try_disconnect() {
        warn!(error = %e, "Failed to queue broker disconnect");
    }
    if tokio::time::timeout(SHUTDOWN_GRACE, &mut broker_loop)
        .await
        .is_err()
    {
        broker_loop.abort();
    }
    if let Err(e) = outbound_worker.await {
        warn!(error = %e, "Outbound worker ended abnormally");
    }

    for device in registry.snapshot().await {
        info!(
            sid = device.id(),
            name = device.display_name(),
            model = device.model(),
            seen = device.last_seen().is_some(),
            "Known device"
        );
    }
    info!("Bridge stopped");
    Ok(())
}
