//! Structured logging.
//!
//! Log level comes from `RUST_LOG` when set, otherwise from
//! `observability.log_level` in the config.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("fcgi_gateway={level},gateway_cli={level},tower_http={level}"))
}
