//! CLI command implementations

pub mod policy;
pub mod resolve;
pub mod watch;

use anyhow::{Context, Result};
use camino::Utf8Path;
use tiered_core::TieredConfig;
use tiered_resolver::Resolver;
use tracing::debug;

fn load_config(path: Option<&Utf8Path>) -> Result<TieredConfig> {
    let config = TieredConfig::load(path).context("Failed to load configuration")?;
    debug!("Using configuration from {}", config.source());
    Ok(config)
}

fn build_resolver(config: &TieredConfig) -> Result<Resolver> {
    Resolver::from_config(config).context("Failed to build resolver")
}
