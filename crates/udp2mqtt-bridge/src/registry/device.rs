//! Device records tracked by the registry.
//!
//! Every record shares a [`DeviceIdentity`]; gateways and sensors add their
//! own fields on top of it.

use std::time::SystemTime;

use udp2mqtt_crypto::CryptoError;

/// Model string reported by gateways.
pub const GATEWAY_MODEL: &str = "gateway";

/// Identity fields common to every device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    id: String,
    display_name: String,
    model: String,
    last_seen: Option<SystemTime>,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            model: String::new(),
            last_seen: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub const fn last_seen(&self) -> Option<SystemTime> {
        self.last_seen
    }

    /// Set the display name if none is assigned yet. Returns whether it changed.
    pub fn fill_display_name(&mut self, name: &str) -> bool {
        if self.display_name.is_empty() && !name.is_empty() {
            self.display_name = name.to_string();
            true
        } else {
            false
        }
    }

    /// Set the model if none is known yet. Returns whether it changed.
    pub fn fill_model(&mut self, model: &str) -> bool {
        if self.model.is_empty() && !model.is_empty() {
            self.model = model.to_string();
            true
        } else {
            false
        }
    }

    pub fn touch(&mut self, at: SystemTime) {
        self.last_seen = Some(at);
    }
}

/// A battery powered sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub identity: DeviceIdentity,
    /// Last reported battery voltage.
    pub voltage: f64,
}

impl Sensor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            identity: DeviceIdentity::new(id),
            voltage: 0.0,
        }
    }

    /// A sensor pre-declared in the allow-list.
    pub fn named(id: impl Into<String>, display_name: &str) -> Self {
        let mut sensor = Self::new(id);
        sensor.identity.fill_display_name(display_name);
        sensor
    }
}

/// A hub that proxies sensors and accepts write commands.
#[derive(Debug, Clone, PartialEq)]
pub struct Gateway {
    pub identity: DeviceIdentity,
    /// Last reported LAN address.
    pub ip_address: String,
    password: String,
    token: String,
    secure_key: Option<String>,
}

impl Gateway {
    pub fn new(id: impl Into<String>) -> Self {
        let mut identity = DeviceIdentity::new(id);
        identity.fill_model(GATEWAY_MODEL);
        Self {
            identity,
            ip_address: String::new(),
            password: String::new(),
            token: String::new(),
            secure_key: None,
        }
    }

    /// A gateway pre-declared in the allow-list with its password.
    pub fn configured(id: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            ..Self::new(id)
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn secure_key(&self) -> Option<&str> {
        self.secure_key.as_deref()
    }

    /// Record a freshly reported token and, when a password is configured,
    /// recompute the secure key from it.
    ///
    /// Returns `Ok(None)` for gateways without a password. A failed derivation
    /// clears the previous key so it is never paired with a newer token.
    pub fn record_token(&mut self, token: &str) -> Result<Option<&str>, CryptoError> {
        if token.is_empty() {
            return Ok(None);
        }
        self.token = token.to_string();
        if self.password.is_empty() {
            return Ok(None);
        }
        match udp2mqtt_crypto::derive_secure_key(self.password.as_bytes(), token.as_bytes()) {
            Ok(key) => {
                self.secure_key = Some(key);
                Ok(self.secure_key.as_deref())
            }
            Err(e) => {
                self.secure_key = None;
                Err(e)
            }
        }
    }
}

/// A registry record: either a sensor or a gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum Device {
    Sensor(Sensor),
    Gateway(Gateway),
}

impl Device {
    /// Build a record for a device first seen on the wire.
    ///
    /// Gateways are recognised by model; everything else is a sensor. The
    /// record gets the generated placeholder name.
    pub fn discovered(id: &str, model: &str, seen_at: SystemTime) -> Self {
        let mut device = if model == GATEWAY_MODEL {
            Self::Gateway(Gateway::new(id))
        } else {
            Self::Sensor(Sensor::new(id))
        };
        let identity = device.identity_mut();
        identity.fill_model(model);
        identity.fill_display_name(&placeholder_name(model, id));
        identity.touch(seen_at);
        device
    }

    pub const fn identity(&self) -> &DeviceIdentity {
        match self {
            Self::Sensor(s) => &s.identity,
            Self::Gateway(g) => &g.identity,
        }
    }

    pub const fn identity_mut(&mut self) -> &mut DeviceIdentity {
        match self {
            Self::Sensor(s) => &mut s.identity,
            Self::Gateway(g) => &mut g.identity,
        }
    }

    pub fn id(&self) -> &str {
        self.identity().id()
    }

    pub fn display_name(&self) -> &str {
        self.identity().display_name()
    }

    pub fn model(&self) -> &str {
        self.identity().model()
    }

    pub const fn last_seen(&self) -> Option<SystemTime> {
        self.identity().last_seen()
    }

    pub const fn is_gateway(&self) -> bool {
        matches!(self, Self::Gateway(_))
    }

    pub const fn as_gateway(&self) -> Option<&Gateway> {
        match self {
            Self::Gateway(g) => Some(g),
            Self::Sensor(_) => None,
        }
    }

    pub const fn as_gateway_mut(&mut self) -> Option<&mut Gateway> {
        match self {
            Self::Gateway(g) => Some(g),
            Self::Sensor(_) => None,
        }
    }

    pub const fn as_sensor(&self) -> Option<&Sensor> {
        match self {
            Self::Sensor(s) => Some(s),
            Self::Gateway(_) => None,
        }
    }
}

/// Name given to devices that are not in the allow-list.
pub fn placeholder_name(model: &str, id: &str) -> String {
    format!("Unknown{}{id}", title_case(model))
}

/// Upper-case the first letter of every word.
///
/// Letters, digits and `_` continue a word; any other character starts a new
/// one, so `sensor_magnet.aq2` becomes `Sensor_magnet.Aq2`.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = is_word_separator(c);
    }
    out
}

fn is_word_separator(c: char) -> bool {
    if c.is_ascii() {
        !(c.is_ascii_alphanumeric() || c == '_')
    } else if c.is_alphanumeric() {
        false
    } else {
        c.is_whitespace()
    }
}
