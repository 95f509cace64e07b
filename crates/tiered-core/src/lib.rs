//! # tiered-core
//!
//! Core library for tiered providing:
//! - Key, kind and resolved-value types
//! - The resolution policy table and its validation
//! - Configuration file parsing (tiered.yaml)
//! - Retry execution engine with policy-based configuration
//! - A clock abstraction for cache expiry

pub mod clock;
pub mod config;
pub mod error;
pub mod policy;
pub mod retry;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::TieredConfig;
pub use error::{Error, Result};
pub use policy::{PolicyEntry, ResolutionPolicy, RetryPolicy, RetryStrategy};
pub use types::{BackendId, EndpointCandidate, Key, Kind, Payload, ResolvedValue};
