//! Logging initialization

use std::sync::Once;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize console logging.
///
/// `RUST_LOG` wins when set; otherwise `default_directive` applies. Logs go to
/// stderr so they do not interleave with the console transcript on stdout.
pub fn init_telemetry(default_directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_directive))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(true))
            .init();

        tracing::debug!(service.name = "liveapi", "Telemetry initialized");
    });
}
