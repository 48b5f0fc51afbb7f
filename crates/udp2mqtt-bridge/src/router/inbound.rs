//! Multicast reports -> broker.
//!
//! Every JSON report is republished verbatim to the telemetry topic before
//! anything else happens. Reports that are not `read`/`read_ask` queries then
//! update the registry: unknown ids get a record, known ids get their
//! timestamp refreshed, and gateways/sensors pick up their model-specific
//! fields.

use std::time::SystemTime;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use udp2mqtt_core::{BridgeConfig, Qos};

use super::{parse_object, str_field};
use crate::registry::{Device, DeviceRegistry, Gateway, Sensor};
use crate::transport::BrokerPublisher;

/// Commands that only query state and must not update the registry.
const READ_COMMANDS: [&str; 2] = ["read", "read_ask"];

/// Models reported by door/window contact sensors.
pub const CONTACT_SENSOR_MODELS: [&str; 3] = ["magnet", "sensor_magnet", "sensor_magnet.aq2"];

/// Tracing target for contact-sensor observations.
pub const CONTACT_LOG_TARGET: &str = "udp2mqtt::contact";

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Not a JSON object; dropped without forwarding.
    Malformed,
    /// Forwarded; a read query, so the registry was left alone.
    ReadProbe,
    /// Forwarded; `sid` or `model` missing, so the registry was left alone.
    MissingIdentity,
    /// Forwarded and the registry updated.
    Updated { sid: String, created: bool },
}

/// Routes multicast reports to the broker and into the registry.
pub struct InboundRouter<P> {
    registry: DeviceRegistry,
    publisher: P,
    topic: String,
    qos: Qos,
    retain: bool,
    log_contact_sensors: bool,
}

impl<P: BrokerPublisher> InboundRouter<P> {
    pub fn new(registry: DeviceRegistry, publisher: P, config: &BridgeConfig) -> Self {
        Self {
            registry,
            publisher,
            topic: config.broker.telemetry_topic.clone(),
            qos: config.broker.qos,
            retain: config.broker.retain,
            log_contact_sensors: config.log_contact_sensors,
        }
    }

    pub const fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Route one raw multicast message.
    pub async fn handle(&self, raw: &str) -> InboundOutcome {
        let Some(payload) = parse_object(raw) else {
            debug!(len = raw.len(), "Dropping non-JSON report");
            return InboundOutcome::Malformed;
        };

        if let Err(e) = self
            .publisher
            .publish(&self.topic, raw.as_bytes(), self.qos, self.retain)
            .await
        {
            warn!(topic = %self.topic, error = %e, "Failed to republish report");
        }

        if str_field(&payload, "cmd").is_some_and(|cmd| READ_COMMANDS.contains(&cmd)) {
            return InboundOutcome::ReadProbe;
        }

        let (Some(sid), Some(model)) = (str_field(&payload, "sid"), str_field(&payload, "model"))
        else {
            debug!("Report without sid/model, registry untouched");
            return InboundOutcome::MissingIdentity;
        };

        let created = self.update_registry(sid, model, &payload).await;

        if self.log_contact_sensors && CONTACT_SENSOR_MODELS.contains(&model) {
            self.log_contact_report(sid, model, raw).await;
        }

        InboundOutcome::Updated {
            sid: sid.to_string(),
            created,
        }
    }

    async fn update_registry(&self, sid: &str, model: &str, payload: &Map<String, Value>) -> bool {
        let mut devices = self.registry.lock().await;
        let (device, created) = devices.record_sighting(sid, model, SystemTime::now());
        if created {
            info!(sid, model, "New device discovered");
        }

        match device {
            Device::Gateway(gateway) => enrich_gateway(gateway, payload),
            Device::Sensor(sensor) => enrich_sensor(sensor, payload),
        }
        created
    }

    async fn log_contact_report(&self, sid: &str, model: &str, raw: &str) {
        let name = self
            .registry
            .find_by_id(sid)
            .await
            .map(|d| d.display_name().to_string())
            .unwrap_or_default();
        info!(
            target: CONTACT_LOG_TARGET,
            name = %name,
            model,
            sid,
            payload = raw,
            "Contact sensor report"
        );
    }
}

/// Gateway fields: token, and the address inside the nested `data` document.
///
/// A `data` field that does not decode stops enrichment for this message.
fn enrich_gateway(gateway: &mut Gateway, payload: &Map<String, Value>) {
    let sid = gateway.identity.id().to_string();

    if let Some(data) = payload.get("data") {
        match gateway_ip(data) {
            Ok(Some(ip)) => gateway.ip_address = ip,
            Ok(None) => {}
            Err(e) => {
                debug!(sid = %sid, error = %e, "Malformed gateway data");
                return;
            }
        }
    }

    let token = str_field(payload, "token").unwrap_or_default();
    match gateway.record_token(token).map(|key| key.is_some()) {
        Ok(true) => info!(
            sid = %sid,
            ip = %gateway.ip_address,
            "Gateway secure key recomputed"
        ),
        Ok(false) => {}
        Err(e) => warn!(sid = %sid, error = %e, "Failed to derive gateway secure key"),
    }
}

/// `data` is normally a JSON document encoded as a string; an inline object
/// is accepted too.
fn gateway_ip(data: &Value) -> Result<Option<String>, serde_json::Error> {
    let decoded;
    let object = match data {
        Value::String(text) => {
            decoded = serde_json::from_str::<Value>(text)?;
            &decoded
        }
        other => other,
    };
    Ok(object.get("ip").and_then(Value::as_str).map(str::to_string))
}

fn enrich_sensor(sensor: &mut Sensor, payload: &Map<String, Value>) {
    if let Some(voltage) = payload.get("Voltage").and_then(Value::as_f64) {
        sensor.voltage = voltage;
    }
}
