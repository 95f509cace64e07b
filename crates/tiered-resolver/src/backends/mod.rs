//! Backend trait and adapters

pub mod env;
pub mod fixed;
pub mod http_store;
pub mod local;
pub mod metadata;
pub mod vault;

use crate::error::BackendError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tiered_core::{BackendId, Key, Kind, Payload, ResolvedValue};
use tokio::time::Instant;

/// A source of values
///
/// Adapters are thin shims over one store. They never retry or cache:
/// the resolver does both.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Stable id used in policy entries
    fn id(&self) -> &BackendId;

    /// Fetch `key`, finishing before `ctx.deadline`
    async fn fetch(&self, key: &Key, ctx: &FetchContext) -> Result<ResolvedValue, BackendError>;
}

/// Per-call context handed to a backend
#[derive(Debug, Clone)]
pub struct FetchContext {
    pub kind: Kind,
    /// Absolute deadline for this attempt
    pub deadline: Instant,
    /// TTL stamped on the produced value
    pub ttl: Option<Duration>,
    /// Time stamped on the produced value
    pub fetched_at: DateTime<Utc>,
}

impl FetchContext {
    pub fn new(kind: Kind, deadline: Instant) -> Self {
        Self {
            kind,
            deadline,
            ttl: kind.default_ttl(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_fetched_at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = fetched_at;
        self
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Build the value this call produced
    pub fn value(&self, key: &Key, value: impl Into<Payload>, source: BackendId) -> ResolvedValue {
        ResolvedValue {
            key: key.clone(),
            kind: self.kind,
            value: value.into(),
            source,
            fetched_at: self.fetched_at,
            ttl: self.ttl,
        }
    }
}

pub use env::EnvBackend;
pub use fixed::StaticBackend;
pub use http_store::HttpStoreBackend;
pub use local::LocalBackend;
pub use metadata::MetadataBackend;
pub use vault::VaultBackend;
