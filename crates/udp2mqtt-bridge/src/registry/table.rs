//! In-memory device registry shared by both routing directions.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use udp2mqtt_core::AllowList;

use super::device::{Device, Gateway, Sensor, placeholder_name};

/// Devices keyed by id. Records are only ever added, never removed.
#[derive(Debug, Default)]
pub struct DeviceTable {
    devices: HashMap<String, Device>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.get_mut(id)
    }

    /// Insert a sensor unless a record with its id already exists.
    ///
    /// Returns the record stored under that id, which is the existing one
    /// when the id was already known.
    pub fn upsert_sensor(&mut self, sensor: Sensor) -> &mut Device {
        self.upsert(Device::Sensor(sensor))
    }

    /// Insert a gateway unless a record with its id already exists.
    pub fn upsert_gateway(&mut self, gateway: Gateway) -> &mut Device {
        self.upsert(Device::Gateway(gateway))
    }

    /// Insert any record unless its id is already known.
    pub fn upsert(&mut self, device: Device) -> &mut Device {
        self.devices
            .entry(device.id().to_string())
            .or_insert(device)
    }

    /// Record that `id` reported itself as `model` at `seen_at`.
    ///
    /// Unknown ids get a discovered record. Known ids have their timestamp
    /// refreshed and an empty display name or model filled in. Returns the
    /// record and whether it was just created.
    pub fn record_sighting(
        &mut self,
        id: &str,
        model: &str,
        seen_at: SystemTime,
    ) -> (&mut Device, bool) {
        match self.devices.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                let device = entry.into_mut();
                let identity = device.identity_mut();
                identity.touch(seen_at);
                identity.fill_display_name(&placeholder_name(model, id));
                identity.fill_model(model);
                (device, false)
            }
            Entry::Vacant(entry) => (entry.insert(Device::discovered(id, model, seen_at)), true),
        }
    }

    /// Seed the table from the allow-list.
    ///
    /// Gateways are created with their password and an empty display name.
    /// Each named id then either names an existing record or becomes a new
    /// sensor with no model.
    pub fn load_allow_list(&mut self, list: &AllowList) {
        for (sid, password) in &list.gateways {
            self.upsert_gateway(Gateway::configured(sid.as_str(), password.as_str()));
        }
        for (sid, name) in &list.names {
            if let Some(device) = self.find_by_id_mut(sid) {
                device.identity_mut().fill_display_name(name);
            } else {
                self.upsert_sensor(Sensor::named(sid.as_str(), name));
            }
        }
        debug!(
            gateways = list.gateways.len(),
            devices = self.devices.len(),
            "Allow-list loaded"
        );
    }

    /// Secure key of the gateway `sid`, if its stored model is `model` and a
    /// key has been derived.
    pub fn secure_key_for(&self, sid: &str, model: &str) -> Option<&str> {
        let device = self.find_by_id(sid)?;
        if device.model() != model {
            return None;
        }
        device.as_gateway()?.secure_key()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }
}

/// Thread-safe handle to the device table.
///
/// One lock guards the whole table so each message's lookup and mutation
/// happen as a single critical section.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    table: Arc<Mutex<DeviceTable>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded from the allow-list.
    pub fn from_allow_list(list: &AllowList) -> Self {
        let mut table = DeviceTable::new();
        table.load_allow_list(list);
        info!(devices = table.len(), "Device registry seeded");
        Self {
            table: Arc::new(Mutex::new(table)),
        }
    }

    /// Lock the table for a read-then-write sequence.
    pub async fn lock(&self) -> MutexGuard<'_, DeviceTable> {
        self.table.lock().await
    }

    /// Copy of the record with the given id.
    pub async fn find_by_id(&self, id: &str) -> Option<Device> {
        self.table.lock().await.find_by_id(id).cloned()
    }

    pub async fn secure_key_for(&self, sid: &str, model: &str) -> Option<String> {
        self.table
            .lock()
            .await
            .secure_key_for(sid, model)
            .map(str::to_string)
    }

    pub async fn len(&self) -> usize {
        self.table.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.table.lock().await.is_empty()
    }

    /// Copies of every record, sorted by id.
    pub async fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.table.lock().await.iter().cloned().collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn sample_allow_list() -> AllowList {
        AllowList::from_json_str(
            r#"{"gateways": {"gw1": "pw1"}, "gw1": "Living Room Hub", "s1": "Door Sensor"}"#,
        )
        .unwrap()
    }

    #[test]
    fn load_allow_list_creates_gateway_and_sensor() {
        let mut table = DeviceTable::new();
        table.load_allow_list(&sample_allow_list());

        assert_eq!(table.len(), 2);

        let gw = table.find_by_id("gw1").unwrap();
        assert!(gw.is_gateway());
        assert_eq!(gw.model(), "gateway");
        assert_eq!(gw.display_name(), "Living Room Hub");
        assert_eq!(gw.as_gateway().unwrap().password(), "pw1");

        let sensor = table.find_by_id("s1").unwrap();
        assert!(sensor.as_sensor().is_some());
        assert_eq!(sensor.display_name(), "Door Sensor");
        assert_eq!(sensor.model(), "");
        assert!(sensor.last_seen().is_none());
    }

    #[test]
    fn gateway_without_name_keeps_empty_display_name() {
        let mut table = DeviceTable::new();
        table.load_allow_list(&AllowList::from_json_str(r#"{"gateways": {"gw1": "pw1"}}"#).unwrap());
        assert_eq!(table.find_by_id("gw1").unwrap().display_name(), "");
    }

    #[test]
    fn upsert_is_noop_for_known_id() {
        let mut table = DeviceTable::new();
        table.upsert_sensor(Sensor::named("s1", "Door"));
        let existing = table.upsert_gateway(Gateway::configured("s1", "pw"));

        assert!(!existing.is_gateway());
        assert_eq!(existing.display_name(), "Door");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn record_sighting_creates_then_refreshes() {
        let mut table = DeviceTable::new();
        let first = SystemTime::UNIX_EPOCH;
        let later = SystemTime::now();

        let (device, created) = table.record_sighting("gw9", "gateway", first);
        assert!(created);
        assert!(device.is_gateway());
        assert_eq!(device.display_name(), "UnknownGatewaygw9");

        let (device, created) = table.record_sighting("gw9", "magnet", later);
        assert!(!created);
        assert!(device.is_gateway());
        assert_eq!(device.model(), "gateway");
        assert_eq!(device.last_seen(), Some(later));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn record_sighting_fills_allow_list_record() {
        let mut table = DeviceTable::new();
        table.load_allow_list(&sample_allow_list());
        table.load_allow_list(&AllowList::from_json_str(r#"{"gateways": {"gw2": "pw2"}}"#).unwrap());

        let (s1, created) = table.record_sighting("s1", "magnet", SystemTime::now());
        assert!(!created);
        assert_eq!(s1.display_name(), "Door Sensor");
        assert_eq!(s1.model(), "magnet");

        let (gw2, _) = table.record_sighting("gw2", "gateway", SystemTime::now());
        assert_eq!(gw2.display_name(), "UnknownGatewaygw2");
    }

    #[test]
    fn find_unknown_id_is_none() {
        let table = DeviceTable::new();
        assert!(table.find_by_id("missing").is_none());
    }

    #[test]
    fn secure_key_requires_matching_model_and_derived_key() {
        let mut table = DeviceTable::new();
        table.upsert_gateway(Gateway::configured("gw1", "0123456789abcdef"));
        assert!(table.secure_key_for("gw1", "gateway").is_none());

        table
            .find_by_id_mut("gw1")
            .unwrap()
            .as_gateway_mut()
            .unwrap()
            .record_token("fedcba9876543210")
            .unwrap();

        assert_eq!(
            table.secure_key_for("gw1", "gateway"),
            Some("52d607fcc1c701c2dad5f2cbffa94318")
        );
        assert!(table.secure_key_for("gw1", "magnet").is_none());
        assert!(table.secure_key_for("gw2", "gateway").is_none());
    }

    #[test]
    fn sensor_never_yields_secure_key() {
        let mut table = DeviceTable::new();
        table.upsert(Device::discovered("s1", "gateway-like", SystemTime::now()));
        assert!(table.secure_key_for("s1", "gateway-like").is_none());
    }

    #[tokio::test]
    async fn registry_handle_shares_state() {
        let registry = DeviceRegistry::from_allow_list(&sample_allow_list());
        let clone = registry.clone();

        clone
            .lock()
            .await
            .upsert(Device::discovered("s2", "motion", SystemTime::now()));

        assert_eq!(registry.len().await, 3);
        let s2 = registry.find_by_id("s2").await.unwrap();
        assert_eq!(s2.display_name(), "UnknownMotions2");
    }

    #[tokio::test]
    async fn snapshot_is_sorted_by_id() {
        let registry = DeviceRegistry::from_allow_list(&sample_allow_list());
        let ids: Vec<String> = registry
            .snapshot()
            .await
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        assert_eq!(ids, vec!["gw1", "s1"]);
    }

    #[tokio::test]
    async fn empty_registry() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty().await);
        assert!(registry.find_by_id("gw1").await.is_none());
        assert!(registry.secure_key_for("gw1", "gateway").await.is_none());
    }
}
