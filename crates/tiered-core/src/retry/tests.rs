//! Tests for the retry module: strategies, executor flow and observers

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::policy::{RetryPolicy, RetryStrategy};
use crate::retry::error::RetryError;
use crate::retry::executor::RetryExecutorBuilder;
use crate::retry::observer::StatsObserver;
use crate::retry::strategies::{calculate_delay, RetryPredicate};

fn quick_policy(max_attempts: u32, strategy: RetryStrategy) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        strategy,
        backoff_multiplier: 2.0,
        initial_delay_ms: 1,
        max_delay_ms: 10,
        jitter: false,
    }
}

fn transient() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "transient")
}

/// Retries only timeouts
struct TimeoutsOnly;

impl RetryPredicate<io::Error> for TimeoutsOnly {
    fn should_retry(&self, error: &io::Error) -> bool {
        error.kind() == io::ErrorKind::TimedOut
    }
}

// ============================================================================
// Strategy Tests
// ============================================================================

#[test]
fn test_strategy_none_always_zero() {
    let policy = RetryPolicy {
        strategy: RetryStrategy::None,
        initial_delay_ms: 1000,
        ..RetryPolicy::default()
    };

    for attempt in 1..=5 {
        assert_eq!(calculate_delay(&policy, attempt), Duration::ZERO);
    }
}

#[test]
fn test_strategy_fixed_constant_delay() {
    let policy = RetryPolicy {
        strategy: RetryStrategy::FixedDelay,
        initial_delay_ms: 500,
        max_delay_ms: 30000,
        ..RetryPolicy::default()
    };

    for attempt in 1..=5 {
        assert_eq!(calculate_delay(&policy, attempt), Duration::from_millis(500));
    }
}

#[test]
fn test_strategy_exponential_doubles_then_caps() {
    let policy = RetryPolicy {
        strategy: RetryStrategy::ExponentialBackoff,
        backoff_multiplier: 2.0,
        initial_delay_ms: 100,
        max_delay_ms: 500,
        ..RetryPolicy::default()
    };

    assert_eq!(calculate_delay(&policy, 1), Duration::from_millis(100));
    assert_eq!(calculate_delay(&policy, 2), Duration::from_millis(200));
    assert_eq!(calculate_delay(&policy, 3), Duration::from_millis(400));
    assert_eq!(calculate_delay(&policy, 4), Duration::from_millis(500));
    assert_eq!(calculate_delay(&policy, 60), Duration::from_millis(500));
}

#[test]
fn test_strategy_linear() {
    let policy = RetryPolicy {
        strategy: RetryStrategy::LinearBackoff,
        initial_delay_ms: 100,
        max_delay_ms: 30000,
        ..RetryPolicy::default()
    };

    assert_eq!(calculate_delay(&policy, 1), Duration::from_millis(100));
    assert_eq!(calculate_delay(&policy, 3), Duration::from_millis(300));
}

#[test]
fn test_jitter_stays_within_quarter() {
    let policy = RetryPolicy {
        strategy: RetryStrategy::FixedDelay,
        initial_delay_ms: 400,
        jitter: true,
        ..RetryPolicy::default()
    };

    for _ in 0..50 {
        let delay = calculate_delay(&policy, 1).as_millis();
        assert!((400..=500).contains(&delay));
    }
}

#[test]
fn test_default_delays_non_decreasing() {
    let policy = RetryPolicy::default();
    let delays: Vec<Duration> = (1..=10).map(|a| calculate_delay(&policy, a)).collect();
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
}

// ============================================================================
// Executor Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_success_after_retries() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let result = RetryExecutorBuilder::new()
        .with_policy(quick_policy(3, RetryStrategy::FixedDelay))
        .build()
        .execute(|| {
            let calls = calls_clone.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("third time")
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "third time");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_after_max_attempts() {
    let observer = Arc::new(StatsObserver::new());
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let result: Result<(), RetryError<io::Error>> = RetryExecutorBuilder::new()
        .with_policy(quick_policy(4, RetryStrategy::ExponentialBackoff))
        .with_observer(observer.clone())
        .with_operation("flaky")
        .build()
        .execute(|| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_exhausted());
    assert_eq!(err.attempts(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(observer.attempt_starts(), 4);
    assert_eq!(observer.exhaustions(), 1);

    // three sleeps between four attempts, never shrinking
    let delays = observer.delays_for("flaky");
    assert_eq!(delays.len(), 3);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_non_retryable_stops_immediately() {
    let observer = Arc::new(StatsObserver::new());
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let result: Result<(), RetryError<io::Error>> = RetryExecutorBuilder::new()
        .with_policy(quick_policy(5, RetryStrategy::FixedDelay))
        .with_predicate(TimeoutsOnly)
        .with_observer(observer.clone())
        .build()
        .execute(|| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"))
            }
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_non_retryable());
    assert_eq!(err.attempts(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(observer.cancellations(), 1);
}

#[tokio::test]
async fn test_predicate_stops_on_first_permanent_error() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let result: Result<(), RetryError<io::Error>> = RetryExecutorBuilder::new()
        .with_policy(quick_policy(5, RetryStrategy::None))
        .with_predicate(TimeoutsOnly)
        .build()
        .execute(|| {
            let calls = calls_clone.clone();
            async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(transient()),
                    _ => Err(io::Error::new(io::ErrorKind::NotFound, "gone")),
                }
            }
        })
        .await;

    let err = result.unwrap_err();
    assert!(err.is_non_retryable());
    assert_eq!(err.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_abandons_remaining_attempts() {
    let policy = RetryPolicy {
        max_attempts: 5,
        strategy: RetryStrategy::FixedDelay,
        initial_delay_ms: 400,
        max_delay_ms: 400,
        ..RetryPolicy::default()
    };
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();
    let deadline = Instant::now() + Duration::from_millis(1000);

    let result: Result<(), RetryError<io::Error>> = RetryExecutorBuilder::new()
        .with_policy(policy)
        .build()
        .execute_until(deadline, || {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

    // attempts at t=0, 400 and 800; sleeping again would end at 1200
    let err = result.unwrap_err();
    assert!(err.is_deadline_exceeded());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(err.attempts(), 3);
}
