//! Message routing between the multicast group and the broker.
//!
//! - [`InboundRouter`]: multicast reports -> registry update + broker publish
//! - [`OutboundRouter`]: broker commands -> secure-key substitution + datagram

pub mod inbound;
pub mod outbound;
#[cfg(test)]
pub(crate) mod testing;

use serde_json::{Map, Value};

pub use inbound::{InboundOutcome, InboundRouter};
pub use outbound::{OutboundOutcome, OutboundRouter, SECURE_KEY_PLACEHOLDER};

/// Parse a raw message as a JSON object; anything else is `None`.
pub(crate) fn parse_object(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// String value of `key`, if present and a string.
pub(crate) fn str_field<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_object_rejects_non_objects() {
        assert!(parse_object(r#"{"sid":"s1"}"#).is_some());
        assert!(parse_object("[1,2]").is_none());
        assert!(parse_object("\"text\"").is_none());
        assert!(parse_object("{broken").is_none());
        assert!(parse_object("").is_none());
    }

    #[test]
    fn str_field_ignores_other_types() {
        let payload = parse_object(r#"{"sid":"s1","short_id":42}"#).unwrap_or_default();
        assert_eq!(str_field(&payload, "sid"), Some("s1"));
        assert_eq!(str_field(&payload, "short_id"), None);
        assert_eq!(str_field(&payload, "missing"), None);
    }
}
