//! Fallback-ordered resolution of secrets, configuration and instance
//! metadata
//!
//! A [`Resolver`] answers `resolve(key, kind, deadline)` by checking its
//! cache, then trying each backend the policy lists for `kind` in order,
//! retrying transient failures, and caching the first success.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tiered_core::{Key, Kind, TieredConfig};
//! use tiered_resolver::Resolver;
//! use tokio::time::Instant;
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = TieredConfig::load(None)?;
//!     let resolver = Resolver::from_config(&config)?;
//!
//!     let deadline = Instant::now() + Duration::from_secs(5);
//!     let value = resolver.resolve(&Key::from("db.password"), Kind::Secret, deadline).await?;
//!     println!("resolved from {}", value.source);
//!     Ok(())
//! }
//! ```

pub mod backends;
pub mod builder;
pub mod cache;
pub mod error;
pub mod resolver;
pub mod selector;
pub mod transport;

pub use backends::{Backend, FetchContext};
pub use cache::{CacheStats, ResolutionCache};
pub use error::{AggregatedFailure, BackendError, BackendErrorKind, BackendFailure, ResolveError};
pub use resolver::{Resolver, ResolverOptions, TransientOnly};
pub use selector::EndpointSelector;
pub use transport::{HttpTransport, Transport};
