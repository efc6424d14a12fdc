//! Logging setup

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "loqa=info";

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default filter. Calling this again after a
/// subscriber is installed does nothing.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
}
