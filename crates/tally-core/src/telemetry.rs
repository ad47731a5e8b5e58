//! Tracing subscriber setup for binaries and tests embedding the engine
//!
//! `RUST_LOG` takes precedence over the default filter passed in.

use tracing::info;
use tracing_subscriber::EnvFilter;

fn env_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a human-readable fmt subscriber
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    info!(version = env!("CARGO_PKG_VERSION"), "Tracing initialized");
    Ok(())
}

/// Install a JSON subscriber for structured log collection
pub fn init_json_tracing(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_filter))
        .with_target(false)
        .json()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;
    info!(version = env!("CARGO_PKG_VERSION"), "JSON tracing initialized");
    Ok(())
}
