//! Retry execution engine with policy-based configuration
//!
//! Backend attempts are retried through this engine. It supports:
//!
//! - Multiple retry strategies: None, Fixed, Exponential, Linear backoff
//! - Optional jitter (off by default so delays are non-decreasing)
//! - Predicates that stop retrying on permanent errors
//! - An optional deadline: no sleep is started that would cross it
//! - Observable attempts via the `RetryObserver` trait
//!
//! # Example
//!
//! ```rust,no_run
//! use tiered_core::policy::RetryPolicy;
//! use tiered_core::retry::{RetryError, RetryExecutorBuilder, TracingObserver};
//! use tokio::time::{Duration, Instant};
//!
//! async fn example() -> Result<String, RetryError<std::io::Error>> {
//!     let deadline = Instant::now() + Duration::from_secs(5);
//!
//!     RetryExecutorBuilder::new()
//!         .with_policy(RetryPolicy::default())
//!         .with_observer(TracingObserver)
//!         .with_operation("vault/db.password")
//!         .build()
//!         .execute_until(deadline, || async { Ok("success".to_string()) })
//!         .await
//! }
//! ```

mod error;
mod executor;
mod observer;
mod strategies;

pub use error::RetryError;
pub use executor::{RetryExecutor, RetryExecutorBuilder};
pub use observer::{NoOpObserver, RetryObserver, StatsObserver, TracingObserver};
pub use strategies::{calculate_delay, AlwaysRetry, RetryPredicate};

#[cfg(test)]
mod tests;
