//! Configuration loading and management

mod loader;
mod schema;

pub use loader::{TieredConfig, CONFIG_ENV_VAR};
pub use schema::{BackendConfig, BackendSpec, Settings, TieredConfigFile};
