//! Telemetry setup
//!
//! Structured logging through `tracing` and `tracing-subscriber`.

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Build the default filter directive for a configured level
pub fn default_directive(level: &str) -> String {
    format!("toolroute={},tower_http=debug", level)
}

/// Initialize the tracing subscriber
///
/// Only the first call per process installs a subscriber; later calls are
/// ignored. `RUST_LOG` takes precedence over `default_level`.
///
/// # Examples
///
/// ```no_run
/// toolroute::telemetry::init("info");
/// tracing::info!("Application started");
/// ```
pub fn init(default_level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(default_level)));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_scopes_crate_and_http_layer() {
        assert_eq!(default_directive("warn"), "toolroute=warn,tower_http=debug");
    }

    #[test]
    fn test_init_is_idempotent() {
        init("debug");
        init("info");
    }
}
