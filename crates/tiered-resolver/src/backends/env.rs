//! Process environment backend

use super::{Backend, FetchContext};
use crate::error::BackendError;
use async_trait::async_trait;
use tiered_core::{BackendId, Key, ResolvedValue};
use tracing::debug;

/// Reads keys from environment variables
///
/// `db.password` is looked up as `DB_PASSWORD`, or `APP_DB_PASSWORD` with
/// prefix `APP`. Values are passed through as raw bytes, so a variable
/// that is not UTF-8 still resolves.
#[derive(Debug, Clone)]
pub struct EnvBackend {
    id: BackendId,
    prefix: Option<String>,
}

impl EnvBackend {
    pub fn new(id: BackendId) -> Self {
        Self { id, prefix: None }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Environment variable consulted for `key`
    pub fn var_name(&self, key: &Key) -> String {
        let name: String = key
            .as_str()
            .chars()
            .map(|c| match c {
                '.' | '-' | '/' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();

        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix.trim_end_matches('_'), name),
            None => name,
        }
    }
}

#[async_trait]
impl Backend for EnvBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn fetch(&self, key: &Key, ctx: &FetchContext) -> Result<ResolvedValue, BackendError> {
        let var = self.var_name(key);
        match std::env::var_os(&var) {
            Some(value) => {
                debug!("Resolved '{}' from environment variable {}", key, var);
                Ok(ctx.value(key, value.into_encoded_bytes(), self.id.clone()))
            }
            None => Err(BackendError::not_found(format!("{} is not set", var))),
        }
    }
}
