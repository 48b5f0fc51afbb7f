//! Broker commands -> multicast group.
//!
//! Gateway write commands must carry a key derived from the gateway's latest
//! token. Clients publish them with [`SECURE_KEY_PLACEHOLDER`] in place of
//! the key and the bridge fills it in before sending.

use tracing::{debug, warn};

use super::{parse_object, str_field};
use crate::registry::{DeviceRegistry, GATEWAY_MODEL};
use crate::transport::DatagramSink;

/// Marker replaced with the gateway's current secure key.
pub const SECURE_KEY_PLACEHOLDER: &str = "%AUTO_SECURE_KEY%";

const WRITE_COMMAND: &str = "write";

/// What happened to one outbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundOutcome {
    /// Not a JSON object; nothing was sent.
    Malformed,
    /// Sent to the group. `substituted` is set when a key was filled in.
    Forwarded { substituted: bool },
    /// The datagram could not be sent.
    SendFailed,
}

pub struct OutboundRouter<S> {
    registry: DeviceRegistry,
    sink: S,
}

impl<S: DatagramSink> OutboundRouter<S> {
    pub const fn new(registry: DeviceRegistry, sink: S) -> Self {
        Self { registry, sink }
    }

    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Route one raw command message.
    pub async fn handle(&self, raw: &str) -> OutboundOutcome {
        let Some(payload) = parse_object(raw) else {
            debug!(len = raw.len(), "Dropping non-JSON command");
            return OutboundOutcome::Malformed;
        };

        let target = str_field(&payload, "sid").filter(|_| {
            raw.contains(SECURE_KEY_PLACEHOLDER)
                && str_field(&payload, "cmd") == Some(WRITE_COMMAND)
                && str_field(&payload, "model") == Some(GATEWAY_MODEL)
        });

        let mut message = None;
        if let Some(sid) = target {
            match self.registry.secure_key_for(sid, GATEWAY_MODEL).await {
                Some(key) => message = Some(raw.replacen(SECURE_KEY_PLACEHOLDER, &key, 1)),
                None => debug!(sid, "No secure key for gateway, placeholder left as is"),
            }
        }

        let substituted = message.is_some();
        let bytes = message.as_deref().unwrap_or(raw).as_bytes();
        match self.sink.send_datagram(bytes).await {
            Ok(()) => OutboundOutcome::Forwarded { substituted },
            Err(e) => {
                warn!(error = %e, "Failed to send command datagram");
                OutboundOutcome::SendFailed
            }
        }
    }
}
