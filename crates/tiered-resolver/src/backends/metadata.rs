//! Instance-metadata backend over a family of versioned endpoints

use super::{Backend, FetchContext};
use crate::error::BackendError;
use crate::selector::EndpointSelector;
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tiered_core::{BackendId, EndpointCandidate, Key, ResolvedValue};
use tracing::debug;

/// Rank given to the environment override so it is always probed first
const OVERRIDE_RANK: u32 = u32::MAX;

/// Label reported for values served by the override endpoint
pub const OVERRIDE_LABEL: &str = "override";

/// Resolves metadata fields through an `EndpointSelector`
///
/// A candidate URL containing `{key}` serves one field per request.
/// Otherwise it serves a JSON document and the key is a dotted path into it
/// (`Limits.CPU`); an empty key returns the whole document. Provenance is
/// reported as `<id>:<label>`, e.g. `metadata:v3`.
#[derive(Debug)]
pub struct MetadataBackend {
    id: BackendId,
    selector: EndpointSelector,
    probe_timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl MetadataBackend {
    pub fn new(
        id: BackendId,
        candidates: Vec<EndpointCandidate>,
        threshold: u32,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id,
            selector: EndpointSelector::new(candidates, threshold),
            probe_timeout: Duration::from_millis(1000),
            transport,
        }
    }

    /// Candidates plus, when `var` is set and non-empty, its URL as the
    /// top-ranked `override` candidate
    pub fn candidates_with_override(
        mut candidates: Vec<EndpointCandidate>,
        var: Option<&str>,
    ) -> Vec<EndpointCandidate> {
        let url = var
            .and_then(|v| std::env::var(v).ok())
            .filter(|url| !url.trim().is_empty());

        if let Some(url) = url {
            debug!("Metadata endpoint overridden to {}", url);
            candidates.push(EndpointCandidate::new(OVERRIDE_LABEL, url, OVERRIDE_RANK));
        }
        candidates
    }

    /// Upper bound for a single endpoint request
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn selector(&self) -> &EndpointSelector {
        &self.selector
    }
}

fn extract(candidate: &EndpointCandidate, key: &Key, body: Vec<u8>) -> Result<Vec<u8>, BackendError> {
    if candidate.url.contains("{key}") || key.as_str().is_empty() {
        return Ok(body);
    }

    let doc: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        BackendError::unavailable(format!(
            "{} did not return a JSON document: {}",
            candidate.label, e
        ))
    })?;

    let field = key
        .as_str()
        .split('.')
        .try_fold(&doc, |node, segment| match node {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        });

    match field {
        Some(serde_json::Value::String(s)) => Ok(s.clone().into_bytes()),
        Some(serde_json::Value::Null) | None => Err(BackendError::not_found(format!(
            "{} metadata has no field '{}'",
            candidate.label, key
        ))),
        Some(other) => Ok(other.to_string().into_bytes()),
    }
}

#[async_trait]
impl Backend for MetadataBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn fetch(&self, key: &Key, ctx: &FetchContext) -> Result<ResolvedValue, BackendError> {
        if ctx.remaining().is_zero() {
            return Err(BackendError::timeout("deadline passed before request"));
        }

        let transport = &self.transport;
        let (candidate, body) = self
            .selector
            .call(|candidate, left| {
                let url = candidate.url_for(key);
                // leave time for the candidates after this one
                let share = ctx.remaining() / u32::try_from(left.max(1)).unwrap_or(u32::MAX);
                let timeout = self.probe_timeout.min(share);
                async move { transport.get(&url, &[], timeout).await }
            })
            .await?;

        let value = extract(&candidate, key, body)?;
        Ok(ctx.value(key, value, self.id.qualified(&candidate.label)))
    }
}
