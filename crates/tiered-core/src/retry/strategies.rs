//! Retry delay strategies and predicates

use crate::policy::{RetryPolicy, RetryStrategy};
use rand::Rng;
use std::time::Duration;

/// Calculate the delay before the next retry attempt
///
/// `attempt` is the attempt that just failed (1-indexed), so with the
/// exponential strategy the delays are `initial`, `initial * m`,
/// `initial * m^2`, ... capped at `max_delay_ms`.
///
/// ```rust
/// use tiered_core::policy::{RetryPolicy, RetryStrategy};
/// use tiered_core::retry::calculate_delay;
///
/// let policy = RetryPolicy {
///     strategy: RetryStrategy::ExponentialBackoff,
///     initial_delay_ms: 100,
///     max_delay_ms: 5000,
///     ..RetryPolicy::default()
/// };
///
/// assert_eq!(calculate_delay(&policy, 1).as_millis(), 100);
/// assert_eq!(calculate_delay(&policy, 2).as_millis(), 200);
/// ```
pub fn calculate_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let attempt_index = attempt.saturating_sub(1);

    let base_delay_ms = match policy.strategy {
        RetryStrategy::None => 0,

        RetryStrategy::FixedDelay => policy.initial_delay_ms,

        RetryStrategy::ExponentialBackoff => {
            let multiplier = policy.backoff_multiplier.powf(attempt_index as f64);
            // saturating float -> int cast
            (policy.initial_delay_ms as f64 * multiplier) as u64
        }

        RetryStrategy::LinearBackoff => policy
            .initial_delay_ms
            .saturating_mul(attempt_index as u64 + 1),
    };

    let capped_delay_ms = base_delay_ms.min(policy.max_delay_ms);

    // up to 25% extra
    let final_delay_ms = if policy.jitter && capped_delay_ms > 0 {
        let jitter_range = capped_delay_ms / 4;
        capped_delay_ms + rand::rng().random_range(0..=jitter_range)
    } else {
        capped_delay_ms
    };

    Duration::from_millis(final_delay_ms)
}

/// Decides whether an error is worth another attempt
pub trait RetryPredicate<E: ?Sized>: Send + Sync {
    fn should_retry(&self, error: &E) -> bool;
}

/// All errors are retryable
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl<E: ?Sized> RetryPredicate<E> for AlwaysRetry {
    fn should_retry(&self, _error: &E) -> bool {
        true
    }
}
