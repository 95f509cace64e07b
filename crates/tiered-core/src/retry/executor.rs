//! Retry execution engine

use std::error::Error;
use std::future::Future;
use std::time::Instant as StdInstant;

use tokio::time::Instant;

use crate::policy::RetryPolicy;

use super::error::RetryError;
use super::observer::{NoOpObserver, RetryObserver};
use super::strategies::{calculate_delay, AlwaysRetry, RetryPredicate};

/// Builder for configuring a `RetryExecutor`
///
/// ```rust
/// use tiered_core::policy::RetryPolicy;
/// use tiered_core::retry::{RetryExecutorBuilder, TracingObserver};
///
/// let executor = RetryExecutorBuilder::new()
///     .with_policy(RetryPolicy::default())
///     .with_observer(TracingObserver)
///     .with_operation("vault:hcom/db.password")
///     .build();
/// ```
pub struct RetryExecutorBuilder<P = AlwaysRetry, O = NoOpObserver> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    operation: String,
}

impl Default for RetryExecutorBuilder<AlwaysRetry, NoOpObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutorBuilder<AlwaysRetry, NoOpObserver> {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::default(),
            predicate: AlwaysRetry,
            observer: NoOpObserver,
            operation: "retry".to_string(),
        }
    }
}

impl<P, O> RetryExecutorBuilder<P, O> {
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The predicate decides whether an error is retried
    pub fn with_predicate<P2>(self, predicate: P2) -> RetryExecutorBuilder<P2, O> {
        RetryExecutorBuilder {
            policy: self.policy,
            predicate,
            observer: self.observer,
            operation: self.operation,
        }
    }

    pub fn with_observer<O2>(self, observer: O2) -> RetryExecutorBuilder<P, O2> {
        RetryExecutorBuilder {
            policy: self.policy,
            predicate: self.predicate,
            observer,
            operation: self.operation,
        }
    }

    /// Name reported to the observer
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn build(self) -> RetryExecutor<P, O> {
        RetryExecutor {
            policy: self.policy,
            predicate: self.predicate,
            observer: self.observer,
            operation: self.operation,
        }
    }
}

/// A retry executor with configurable policy, predicate, and observer
pub struct RetryExecutor<P, O> {
    policy: RetryPolicy,
    predicate: P,
    observer: O,
    operation: String,
}

impl<P, O> RetryExecutor<P, O>
where
    O: RetryObserver,
{
    /// Execute an operation with retry logic and no deadline
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + Send + 'static,
        P: RetryPredicate<E>,
    {
        self.run(None, op).await
    }

    /// Execute an operation, abandoning further attempts once `deadline`
    /// would pass before the next one could start
    pub async fn execute_until<F, Fut, T, E>(&self, deadline: Instant, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + Send + 'static,
        P: RetryPredicate<E>,
    {
        self.run(Some(deadline), op).await
    }

    async fn run<F, Fut, T, E>(&self, deadline: Option<Instant>, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Error + Send + 'static,
        P: RetryPredicate<E>,
    {
        let start = StdInstant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let operation = self.operation.as_str();

        let mut attempt = 1;
        loop {
            self.observer
                .on_attempt_start(operation, attempt, max_attempts);

            let err = match op().await {
                Ok(result) => {
                    self.observer
                        .on_success(operation, attempt, start.elapsed());
                    return Ok(result);
                }
                Err(err) => err,
            };

            if !self.predicate.should_retry(&err) {
                self.observer.on_cancelled(operation, attempt, &err);
                return Err(RetryError::non_retryable(attempt, err));
            }

            if attempt >= max_attempts {
                self.observer.on_exhausted(operation, attempt, &err);
                return Err(RetryError::exhausted(attempt, err, start.elapsed()));
            }

            let delay = calculate_delay(&self.policy, attempt);

            if let Some(deadline) = deadline {
                if Instant::now() + delay >= deadline {
                    self.observer.on_cancelled(operation, attempt, &err);
                    return Err(RetryError::deadline_exceeded(attempt, err));
                }
            }

            self.observer
                .on_attempt_failed(operation, attempt, &err, delay);

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }
}
