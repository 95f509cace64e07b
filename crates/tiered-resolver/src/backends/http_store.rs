//! Remote key-value store over HTTP (`GET {base-url}/{key}`)

use super::{Backend, FetchContext};
use crate::error::BackendError;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tiered_core::{BackendId, Key, ResolvedValue};
use tracing::debug;
use url::Url;

/// Parameter-store style backend
///
/// The key's `/`-separated segments are appended to the base URL. With a
/// value pointer the body is parsed as JSON and the pointed-at field is the
/// value; otherwise the raw body is.
#[derive(Debug)]
pub struct HttpStoreBackend {
    id: BackendId,
    base_url: Url,
    token_env: Option<String>,
    value_pointer: Option<String>,
    transport: Arc<dyn Transport>,
}

impl HttpStoreBackend {
    pub fn new(id: BackendId, base_url: &str, transport: Arc<dyn Transport>) -> Result<Self, url::ParseError> {
        Ok(Self {
            id,
            base_url: Url::parse(base_url)?,
            token_env: None,
            value_pointer: None,
            transport,
        })
    }

    /// Send `Authorization: Bearer $<var>` on every request
    pub fn with_token_env(mut self, var: impl Into<String>) -> Self {
        self.token_env = Some(var.into());
        self
    }

    /// JSON pointer (`/Parameter/Value`) to the value inside the body
    pub fn with_value_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.value_pointer = Some(pointer.into());
        self
    }

    /// URL requested for `key`
    pub fn url_for(&self, key: &Key) -> Result<Url, BackendError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::unavailable(format!("{} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(key.as_str().split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn headers(&self) -> Result<Vec<(String, String)>, BackendError> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if let Some(var) = &self.token_env {
            let token = std::env::var(var)
                .map_err(|_| BackendError::unauthorized(format!("{} is not set", var)))?;
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
        Ok(headers)
    }

    fn extract(&self, key: &Key, body: Vec<u8>) -> Result<Vec<u8>, BackendError> {
        let Some(pointer) = &self.value_pointer else {
            return Ok(body);
        };

        let doc: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
            BackendError::unavailable(format!("response for '{}' is not JSON: {}", key, e))
        })?;

        match doc.pointer(pointer) {
            Some(serde_json::Value::String(s)) => Ok(s.clone().into_bytes()),
            Some(serde_json::Value::Null) | None => Err(BackendError::not_found(format!(
                "response for '{}' has no {}",
                key, pointer
            ))),
            Some(other) => Ok(other.to_string().into_bytes()),
        }
    }
}

#[async_trait]
impl Backend for HttpStoreBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn fetch(&self, key: &Key, ctx: &FetchContext) -> Result<ResolvedValue, BackendError> {
        let remaining = ctx.remaining();
        if remaining.is_zero() {
            return Err(BackendError::timeout("deadline passed before request"));
        }

        let url = self.url_for(key)?;
        let headers = self.headers()?;

        debug!("Fetching '{}' from {}", key, self.id);
        let body = self.transport.get(url.as_str(), &headers, remaining).await?;
        let value = self.extract(key, body)?;

        Ok(ctx.value(key, value, self.id.clone()))
    }
}
