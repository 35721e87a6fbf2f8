//! Structured logging to stderr. Stdout is reserved for command output.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Initialize the logging system based on configuration.
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless;
/// the second subscriber is discarded.
pub fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let fmt_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);

    let result = if config.json {
        let fmt_layer = fmt_layer.json();
        tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()
    };

    if result.is_err() {
        tracing::debug!("logging already initialized");
    }
}
