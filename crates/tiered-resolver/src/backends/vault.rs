//! HashiCorp Vault KV v2 backend

use super::{Backend, FetchContext};
use crate::error::BackendError;
use async_trait::async_trait;
use std::collections::HashMap;
use tiered_core::{BackendId, Key, ResolvedValue};
use tracing::debug;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use vaultrs::kv2;

/// Reads secrets from one Vault instance
///
/// Key syntax is `path/to/secret#field`; without `#field` the configured
/// default field is read. Several instances can coexist under different ids
/// (`vault:hcom`, `vault:ewe`).
#[derive(Debug, Clone)]
pub struct VaultBackend {
    id: BackendId,
    address: String,
    mount: String,
    token_env: String,
    namespace: Option<String>,
    default_field: String,
}

impl VaultBackend {
    pub fn new(id: BackendId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            mount: "secret".to_string(),
            token_env: "VAULT_TOKEN".to_string(),
            namespace: None,
            default_field: "value".to_string(),
        }
    }

    pub fn with_mount(mut self, mount: impl Into<String>) -> Self {
        self.mount = mount.into();
        self
    }

    pub fn with_token_env(mut self, var: impl Into<String>) -> Self {
        self.token_env = var.into();
        self
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    pub fn with_default_field(mut self, field: impl Into<String>) -> Self {
        self.default_field = field.into();
        self
    }

    /// Split a key into secret path and field
    pub fn locate<'a>(&'a self, key: &'a Key) -> (&'a str, &'a str) {
        match key.as_str().split_once('#') {
            Some((path, field)) if !field.is_empty() => (path, field),
            Some((path, _)) => (path, &self.default_field),
            None => (key.as_str(), &self.default_field),
        }
    }

    fn client(&self, ctx: &FetchContext) -> Result<VaultClient, BackendError> {
        let token = std::env::var(&self.token_env)
            .map_err(|_| BackendError::unauthorized(format!("{} is not set", self.token_env)))?;

        let mut settings = VaultClientSettingsBuilder::default();
        settings.address(&self.address);
        settings.token(token);
        settings.timeout(Some(ctx.remaining()));
        if let Some(ns) = &self.namespace {
            settings.namespace(Some(ns.clone()));
        }

        let settings = settings
            .build()
            .map_err(|e| BackendError::unavailable(format!("invalid Vault settings: {}", e)))?;
        VaultClient::new(settings).map_err(|e| classify(&self.address, e))
    }
}

fn classify(address: &str, err: ClientError) -> BackendError {
    match err {
        ClientError::APIError { code: 404, .. } => {
            BackendError::not_found(format!("{}: secret not found", address))
        }
        ClientError::APIError {
            code: code @ (401 | 403),
            ..
        } => BackendError::unauthorized(format!("{}: permission denied ({})", address, code)),
        other => BackendError::unavailable(format!("{}: {}", address, other)),
    }
}

#[async_trait]
impl Backend for VaultBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn fetch(&self, key: &Key, ctx: &FetchContext) -> Result<ResolvedValue, BackendError> {
        if ctx.remaining().is_zero() {
            return Err(BackendError::timeout("deadline passed before request"));
        }

        let (path, field) = self.locate(key);
        let client = self.client(ctx)?;

        let secret = tokio::time::timeout_at(
            ctx.deadline,
            kv2::read::<HashMap<String, serde_json::Value>>(&client, &self.mount, path),
        )
        .await
        .map_err(|_| BackendError::timeout(format!("{}: read of {} timed out", self.address, path)))?
        .map_err(|e| classify(&self.address, e))?;

        let value = match secret.get(field) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => {
                return Err(BackendError::not_found(format!(
                    "secret {}/{} has no field '{}'",
                    self.mount, path, field
                )))
            }
            Some(other) => other.to_string(),
        };

        debug!("Read secret {}/{} from {}", self.mount, path, self.id);
        Ok(ctx.value(key, value, self.id.clone()))
    }
}
