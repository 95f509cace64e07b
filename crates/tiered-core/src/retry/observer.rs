//! Retry observation and logging

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Receives callbacks while an operation is retried
///
/// `operation` names what is being retried, e.g. `vault:hcom/db.password`.
pub trait RetryObserver: Send + Sync {
    /// An attempt is about to start (1-indexed)
    fn on_attempt_start(&self, operation: &str, attempt: u32, max_attempts: u32);

    /// An attempt failed and will be retried after `delay`
    fn on_attempt_failed(&self, operation: &str, attempt: u32, error: &dyn Error, delay: Duration);

    /// The operation succeeded
    fn on_success(&self, operation: &str, attempt: u32, total_duration: Duration);

    /// All attempts failed
    fn on_exhausted(&self, operation: &str, attempts: u32, final_error: &dyn Error);

    /// Retrying stopped early: a non-retryable error, or the deadline
    fn on_cancelled(&self, operation: &str, attempt: u32, error: &dyn Error) {
        let _ = (operation, attempt, error);
    }
}

/// Observer that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpObserver;

impl RetryObserver for NoOpObserver {
    fn on_attempt_start(&self, _operation: &str, _attempt: u32, _max_attempts: u32) {}

    fn on_attempt_failed(&self, _operation: &str, _attempt: u32, _error: &dyn Error, _delay: Duration) {}

    fn on_success(&self, _operation: &str, _attempt: u32, _total_duration: Duration) {}

    fn on_exhausted(&self, _operation: &str, _attempts: u32, _final_error: &dyn Error) {}
}

/// Logs retry events with `tracing`
///
/// - `on_attempt_start`: TRACE
/// - `on_attempt_failed`: WARN
/// - `on_success`: INFO after a retry, DEBUG on the first attempt
/// - `on_exhausted`: WARN (the chain moves on to the next backend)
/// - `on_cancelled`: DEBUG
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl RetryObserver for TracingObserver {
    fn on_attempt_start(&self, operation: &str, attempt: u32, max_attempts: u32) {
        tracing::trace!(
            operation = %operation,
            attempt = attempt,
            max_attempts = max_attempts,
            "starting attempt"
        );
    }

    fn on_attempt_failed(&self, operation: &str, attempt: u32, error: &dyn Error, delay: Duration) {
        tracing::warn!(
            operation = %operation,
            attempt = attempt,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "attempt failed, will retry"
        );
    }

    fn on_success(&self, operation: &str, attempt: u32, total_duration: Duration) {
        if attempt > 1 {
            tracing::info!(
                operation = %operation,
                attempt = attempt,
                total_duration_ms = total_duration.as_millis() as u64,
                "succeeded after retry"
            );
        } else {
            tracing::debug!(
                operation = %operation,
                duration_ms = total_duration.as_millis() as u64,
                "succeeded on first attempt"
            );
        }
    }

    fn on_exhausted(&self, operation: &str, attempts: u32, final_error: &dyn Error) {
        tracing::warn!(
            operation = %operation,
            attempts = attempts,
            error = %final_error,
            "all retry attempts exhausted"
        );
    }

    fn on_cancelled(&self, operation: &str, attempt: u32, error: &dyn Error) {
        tracing::debug!(
            operation = %operation,
            attempt = attempt,
            error = %error,
            "retry stopped early"
        );
    }
}

/// Collects counts and the scheduled delays. Useful for tests and metrics.
#[derive(Debug, Default)]
pub struct StatsObserver {
    attempt_starts: AtomicU32,
    failures: AtomicU32,
    successes: AtomicU32,
    exhaustions: AtomicU32,
    cancellations: AtomicU32,
    delays: Mutex<Vec<(String, Duration)>>,
}

impl StatsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempt_starts(&self) -> u32 {
        self.attempt_starts.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn successes(&self) -> u32 {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn exhaustions(&self) -> u32 {
        self.exhaustions.load(Ordering::SeqCst)
    }

    pub fn cancellations(&self) -> u32 {
        self.cancellations.load(Ordering::SeqCst)
    }

    /// Delays scheduled for `operation`, in order
    pub fn delays_for(&self, operation: &str) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(op, _)| op == operation)
            .map(|(_, delay)| *delay)
            .collect()
    }
}

impl RetryObserver for StatsObserver {
    fn on_attempt_start(&self, _operation: &str, _attempt: u32, _max_attempts: u32) {
        self.attempt_starts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_attempt_failed(&self, operation: &str, _attempt: u32, _error: &dyn Error, delay: Duration) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((operation.to_string(), delay));
    }

    fn on_success(&self, _operation: &str, _attempt: u32, _total_duration: Duration) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }

    fn on_exhausted(&self, _operation: &str, _attempts: u32, _final_error: &dyn Error) {
        self.exhaustions.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cancelled(&self, _operation: &str, _attempt: u32, _error: &dyn Error) {
        self.cancellations.fetch_add(1, Ordering::SeqCst);
    }
}

impl<T: RetryObserver + ?Sized> RetryObserver for std::sync::Arc<T> {
    fn on_attempt_start(&self, operation: &str, attempt: u32, max_attempts: u32) {
        (**self).on_attempt_start(operation, attempt, max_attempts)
    }

    fn on_attempt_failed(&self, operation: &str, attempt: u32, error: &dyn Error, delay: Duration) {
        (**self).on_attempt_failed(operation, attempt, error, delay)
    }

    fn on_success(&self, operation: &str, attempt: u32, total_duration: Duration) {
        (**self).on_success(operation, attempt, total_duration)
    }

    fn on_exhausted(&self, operation: &str, attempts: u32, final_error: &dyn Error) {
        (**self).on_exhausted(operation, attempts, final_error)
    }

    fn on_cancelled(&self, operation: &str, attempt: u32, error: &dyn Error) {
        (**self).on_cancelled(operation, attempt, error)
    }
}
