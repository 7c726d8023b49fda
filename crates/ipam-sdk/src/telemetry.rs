//! Logging bootstrap

use ipam_common::{IpamError, IpamResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LogConfig;

/// Install the global subscriber; `RUST_LOG` wins over the configured level
pub fn init_tracing(config: &LogConfig) -> IpamResult<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.level))
        .map_err(|e| IpamError::Config(format!("log level {:?}: {e}", config.level)))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(config.ansi))
        .try_init()
        .map_err(|e| IpamError::Config(format!("tracing already initialised: {e}")))
}
