//! Tracing setup

use tracing_subscriber::EnvFilter;

use crate::LogConfig;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level. Returns false when a
/// subscriber was already installed.
pub fn init_tracing(config: &LogConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    installed.is_ok()
}
