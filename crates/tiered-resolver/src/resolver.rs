//! The resolver: cache check, then each backend of the kind's policy entry
//! in order, with retry and a shared deadline
//!
//! ```text
//! CACHE_CHECK ──hit──────────────────────────────▶ value
//!     │ miss
//!     ▼
//! BACKEND_ITERATE ──first success (cached)───────▶ value
//!     │ every backend failed
//!     ▼
//! EXHAUSTED ─────────────────────────────────────▶ AggregatedFailure
//! ```

use crate::backends::{Backend, FetchContext};
use crate::cache::{CacheStats, ResolutionCache};
use crate::error::{AggregatedFailure, BackendError, BackendErrorKind, BackendFailure, ResolveError};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tiered_core::retry::{RetryError, RetryExecutorBuilder, RetryObserver, RetryPredicate, TracingObserver};
use tiered_core::{BackendId, Clock, Key, Kind, PolicyEntry, ResolutionPolicy, ResolvedValue, RetryPolicy, SystemClock};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Default bound on backend calls in flight
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 16;

/// Retry only `Timeout` and `Unavailable`
#[derive(Debug, Clone, Copy, Default)]
pub struct TransientOnly;

impl RetryPredicate<BackendError> for TransientOnly {
    fn should_retry(&self, error: &BackendError) -> bool {
        error.is_retryable()
    }
}

/// Knobs that are not part of the policy table
#[derive(Clone)]
pub struct ResolverOptions {
    /// Backoff timing; the attempt budget comes from each policy entry
    pub retry: RetryPolicy,
    pub max_concurrent_fetches: usize,
    pub clock: Arc<dyn Clock>,
    pub observer: Arc<dyn RetryObserver>,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            clock: Arc::new(SystemClock),
            observer: Arc::new(TracingObserver),
        }
    }
}

impl ResolverOptions {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.observer = observer;
        self
    }
}

/// Resolves keys through the policy's backend chain
///
/// `Send + Sync`; share it behind an `Arc`. Concurrent resolves of the same
/// missing key may each hit the backends; the last write to the cache wins.
pub struct Resolver {
    policy: ResolutionPolicy,
    backends: HashMap<BackendId, Arc<dyn Backend>>,
    cache: Arc<ResolutionCache>,
    retry: RetryPolicy,
    permits: Semaphore,
    max_concurrent: usize,
    observer: Arc<dyn RetryObserver>,
    /// First kind each key was resolved as
    kinds: Mutex<HashMap<Key, Kind>>,
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.backends.keys().collect();
        ids.sort();
        f.debug_struct("Resolver")
            .field("policy", &self.policy)
            .field("backends", &ids)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

impl Resolver {
    /// Wire a resolver; every backend the policy names must be supplied
    pub fn new(
        policy: ResolutionPolicy,
        backends: Vec<Arc<dyn Backend>>,
        options: ResolverOptions,
    ) -> tiered_core::Result<Self> {
        let mut by_id = HashMap::new();
        for backend in backends {
            let id = backend.id().clone();
            if by_id.insert(id.clone(), backend).is_some() {
                return Err(tiered_core::Error::DuplicateBackendDefinition { backend: id });
            }
        }

        for entry in policy.entries() {
            if let Some(missing) = entry.backends.iter().find(|id| !by_id.contains_key(*id)) {
                return Err(tiered_core::Error::unknown_backend(entry.kind, missing.clone()));
            }
        }

        let max_concurrent = options.max_concurrent_fetches.max(1);
        Ok(Self {
            policy,
            backends: by_id,
            cache: Arc::new(ResolutionCache::new(options.clock)),
            retry: options.retry,
            permits: Semaphore::new(max_concurrent),
            max_concurrent,
            observer: options.observer,
            kinds: Mutex::new(HashMap::new()),
        })
    }

    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Start purging expired cache entries every `interval`
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        self.cache.spawn_sweeper(interval)
    }

    /// Resolve `key` as `kind`, giving up on backends once `deadline` passes
    pub async fn resolve(
        &self,
        key: &Key,
        kind: Kind,
        deadline: Instant,
    ) -> Result<Arc<ResolvedValue>, ResolveError> {
        self.check_kind(key, kind)?;

        if let Some(hit) = self.cache.get(key).await {
            debug!("Resolved {} '{}' from cache ({})", kind, key, hit.source);
            return Ok(hit);
        }

        let entry = self.policy.entry(kind);
        let mut failures = Vec::with_capacity(entry.backends.len());

        for id in &entry.backends {
            let Some(backend) = self.backends.get(id) else {
                // construction guarantees every policy backend is registered
                failures.push(BackendFailure {
                    backend: id.clone(),
                    kind: BackendErrorKind::Unavailable,
                    attempts: 0,
                    message: "backend is not registered".to_string(),
                });
                continue;
            };

            match self.try_backend(backend.as_ref(), key, entry, deadline).await {
                Ok(value) => {
                    debug!("Resolved {} '{}' from {}", kind, key, value.source);
                    let value = Arc::new(value);
                    self.cache.put(value.clone()).await;
                    return Ok(value);
                }
                Err(failure) => {
                    if failure.kind.is_retryable() {
                        warn!(
                            "Backend {} failed for '{}' after {} attempt(s): {}",
                            failure.backend, key, failure.attempts, failure.message
                        );
                    } else {
                        debug!("Backend {} could not serve '{}': {}", failure.backend, key, failure.kind);
                    }
                    failures.push(failure);
                }
            }
        }

        Err(ResolveError::Exhausted(AggregatedFailure {
            key: key.clone(),
            kind,
            failures,
        }))
    }

    /// Resolve several keys concurrently; results come back in request order
    pub async fn resolve_many(
        &self,
        requests: Vec<(Key, Kind)>,
        deadline: Instant,
    ) -> Vec<(Key, Result<Arc<ResolvedValue>, ResolveError>)> {
        stream::iter(requests)
            .map(|(key, kind)| async move {
                let result = self.resolve(&key, kind, deadline).await;
                (key, result)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await
    }

    /// Drop any cached value for `key`; returns whether one was cached
    pub async fn invalidate(&self, key: &Key) -> bool {
        self.cache.invalidate(key).await
    }

    /// Bypass the cache: invalidate, then resolve again
    pub async fn refresh(
        &self,
        key: &Key,
        kind: Kind,
        deadline: Instant,
    ) -> Result<Arc<ResolvedValue>, ResolveError> {
        self.check_kind(key, kind)?;
        self.invalidate(key).await;
        self.resolve(key, kind, deadline).await
    }

    fn check_kind(&self, key: &Key, kind: Kind) -> Result<(), ResolveError> {
        let mut kinds = self.kinds.lock().unwrap_or_else(|e| e.into_inner());
        let recorded = *kinds.entry(key.clone()).or_insert(kind);
        if recorded != kind {
            return Err(ResolveError::KindConflict {
                key: key.clone(),
                requested: kind,
                recorded,
            });
        }
        Ok(())
    }

    /// All attempts against one backend, retried per the entry's budget
    async fn try_backend(
        &self,
        backend: &dyn Backend,
        key: &Key,
        entry: &PolicyEntry,
        deadline: Instant,
    ) -> Result<ResolvedValue, BackendFailure> {
        let id = backend.id();

        if Instant::now() >= deadline {
            return Err(BackendFailure {
                backend: id.clone(),
                kind: BackendErrorKind::Timeout,
                attempts: 0,
                message: "deadline passed before the first attempt".to_string(),
            });
        }

        let executor = RetryExecutorBuilder::new()
            .with_policy(self.retry.with_max_attempts(entry.max_retries))
            .with_predicate(TransientOnly)
            .with_observer(self.observer.clone())
            .with_operation(format!("{}/{}", id, key))
            .build();

        let per_attempt = entry.per_backend_timeout();
        let result = executor
            .execute_until(deadline, || async move {
                let started = Instant::now();
                let attempt_deadline = (started + per_attempt).min(deadline);

                let _permit = tokio::time::timeout_at(attempt_deadline, self.permits.acquire())
                    .await
                    .map_err(|_| BackendError::timeout("waited too long for a fetch slot"))?
                    .map_err(|_| BackendError::unavailable("resolver is shutting down"))?;

                let ctx = FetchContext::new(entry.kind, attempt_deadline)
                    .with_ttl(entry.ttl())
                    .with_fetched_at(self.cache.clock().now());

                match tokio::time::timeout_at(attempt_deadline, backend.fetch(key, &ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(BackendError::timeout(format!(
                        "no answer within {}ms",
                        attempt_deadline.saturating_duration_since(started).as_millis()
                    ))),
                }
            })
            .await;

        result.map_err(|err: RetryError<BackendError>| {
            let attempts = err.attempts();
            let source = err.into_source();
            BackendFailure {
                backend: id.clone(),
                kind: source.kind,
                attempts,
                message: source.message,
            }
        })
    }
}
