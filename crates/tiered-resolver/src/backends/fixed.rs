//! Injected values (`type: static`)

use super::{Backend, FetchContext};
use crate::error::BackendError;
use async_trait::async_trait;
use std::collections::HashMap;
use tiered_core::{BackendId, Key, ResolvedValue};

/// Serves a fixed map of values, typically a configured fallback such as a
/// default role ARN sitting behind an environment override
#[derive(Clone)]
pub struct StaticBackend {
    id: BackendId,
    values: HashMap<Key, String>,
}

impl StaticBackend {
    pub fn new(id: BackendId) -> Self {
        Self {
            id,
            values: HashMap::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<Key>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn with_values<I, K, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Key>,
        V: Into<String>,
    {
        self.values
            .extend(values.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for StaticBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticBackend")
            .field("id", &self.id)
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Backend for StaticBackend {
    fn id(&self) -> &BackendId {
        &self.id
    }

    async fn fetch(&self, key: &Key, ctx: &FetchContext) -> Result<ResolvedValue, BackendError> {
        self.values
            .get(key)
            .map(|value| ctx.value(key, value.as_str(), self.id.clone()))
            .ok_or_else(|| BackendError::not_found(format!("no injected value for '{}'", key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tiered_core::Kind;
    use tokio::time::Instant;

    #[tokio::test]
    async fn test_serves_injected_values() {
        let backend = StaticBackend::new(BackendId::from("defaults")).with_values([
            ("task.role", "arn:aws:iam::123456789012:role/app"),
            ("region", "us-east-1"),
        ]);
        let ctx = FetchContext::new(Kind::Config, Instant::now() + Duration::from_secs(1));

        let value = backend.fetch(&Key::from("region"), &ctx).await.unwrap();
        assert_eq!(value.value.as_str(), Some("us-east-1"));
        assert_eq!(backend.len(), 2);

        let err = backend.fetch(&Key::from("zone"), &ctx).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_debug_hides_values() {
        let backend = StaticBackend::new(BackendId::from("defaults")).with_value("token", "hunter2");
        assert!(!format!("{:?}", backend).contains("hunter2"));
    }
}
