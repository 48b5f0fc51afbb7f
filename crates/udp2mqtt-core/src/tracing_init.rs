//! Tracing/logging initialization for the bridge binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"udp2mqtt_bridge=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );
    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter directive for the given level, covering both the
/// bridge crate and the contact-sensor observation target.
pub fn default_filter(level: &str) -> String {
    format!("udp2mqtt_bridge={level},udp2mqtt::contact={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_covers_contact_target() {
        let filter = default_filter("debug");
        assert_eq!(filter, "udp2mqtt_bridge=debug,udp2mqtt::contact=debug");
    }
}
