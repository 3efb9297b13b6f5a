//! Tracing setup for applications embedding the client.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "jinrou_sync=info";

/// Install a global `fmt` subscriber, honouring `RUST_LOG`.
///
/// Fails instead of panicking if a subscriber is already installed.
pub fn init_tracing(json: bool) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_ansi(false)
            .json()
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing subscriber: {err}"))
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .try_init()
            .map_err(|err| anyhow!("failed to initialize tracing subscriber: {err}"))
    }
}
