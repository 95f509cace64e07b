//! Construct backends and a resolver from a loaded configuration

use crate::backends::{
    Backend, EnvBackend, HttpStoreBackend, LocalBackend, MetadataBackend, StaticBackend, VaultBackend,
};
use crate::resolver::{Resolver, ResolverOptions};
use crate::transport::{HttpTransport, Transport};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tiered_core::config::{BackendConfig, BackendSpec, Settings};
use tiered_core::TieredConfig;
use tracing::debug;

/// Instantiate one backend from its definition
pub fn build_backend(
    config: &BackendConfig,
    settings: &Settings,
    transport: &Arc<dyn Transport>,
) -> Result<Arc<dyn Backend>> {
    let id = config.id.clone();
    debug!("Building {} backend '{}'", config.spec.type_name(), id);

    let backend: Arc<dyn Backend> = match &config.spec {
        BackendSpec::Env { prefix } => {
            let backend = EnvBackend::new(id);
            Arc::new(match prefix {
                Some(prefix) => backend.with_prefix(prefix),
                None => backend,
            })
        }
        BackendSpec::Local { dotenv, yaml } => {
            let mut backend = LocalBackend::new(id);
            if let Some(path) = dotenv {
                backend = backend.with_dotenv(path.clone());
            }
            if let Some(path) = yaml {
                backend = backend.with_yaml(path.clone());
            }
            Arc::new(backend)
        }
        BackendSpec::Static { values } => {
            Arc::new(StaticBackend::new(id).with_values(values.clone()))
        }
        BackendSpec::HttpStore {
            base_url,
            token_env,
            value_pointer,
        } => {
            let mut backend = HttpStoreBackend::new(id, base_url, transport.clone())
                .with_context(|| format!("Invalid base-url for backend '{}'", config.id))?;
            if let Some(var) = token_env {
                backend = backend.with_token_env(var);
            }
            if let Some(pointer) = value_pointer {
                backend = backend.with_value_pointer(pointer);
            }
            Arc::new(backend)
        }
        BackendSpec::Vault {
            address,
            mount,
            token_env,
            namespace,
            field,
        } => Arc::new(
            VaultBackend::new(id, address)
                .with_mount(mount)
                .with_token_env(token_env)
                .with_namespace(namespace.clone())
                .with_default_field(field),
        ),
        BackendSpec::Metadata {
            candidates,
            override_env,
            probe_timeout_ms,
        } => {
            let candidates =
                MetadataBackend::candidates_with_override(candidates.clone(), override_env.as_deref());
            Arc::new(
                MetadataBackend::new(
                    id,
                    candidates,
                    settings.consecutive_failure_threshold,
                    transport.clone(),
                )
                .with_probe_timeout(Duration::from_millis(*probe_timeout_ms)),
            )
        }
    };

    Ok(backend)
}

/// Instantiate every backend the configuration defines
pub fn build_backends(config: &TieredConfig, transport: Arc<dyn Transport>) -> Result<Vec<Arc<dyn Backend>>> {
    config
        .config
        .backends
        .iter()
        .map(|backend| build_backend(backend, config.settings(), &transport))
        .collect()
}

/// Resolver options taken from the configuration's settings and retry section
pub fn options_from_config(config: &TieredConfig) -> ResolverOptions {
    ResolverOptions::default()
        .with_retry(config.retry().clone())
        .with_max_concurrent_fetches(config.settings().max_concurrent_fetches)
}

impl Resolver {
    /// Build a resolver with real HTTP transport from a loaded configuration
    pub fn from_config(config: &TieredConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> =
            Arc::new(HttpTransport::new().context("Failed to build HTTP client")?);
        Self::from_config_with(config, transport, options_from_config(config))
    }

    /// Build a resolver with a caller-supplied transport and options
    pub fn from_config_with(
        config: &TieredConfig,
        transport: Arc<dyn Transport>,
        options: ResolverOptions,
    ) -> Result<Self> {
        let backends = build_backends(config, transport)?;
        let resolver = Resolver::new(config.policy().clone(), backends, options)
            .context("Failed to wire resolver")?;
        Ok(resolver)
    }
}
