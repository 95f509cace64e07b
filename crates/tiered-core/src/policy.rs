//! Resolution policy: which backends answer each kind, in which order,
//! and with what timing
//!
//! The policy is pure data. It is validated once when built and never
//! mutated afterwards.

use crate::error::{Error, Result};
use crate::types::{BackendId, Kind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Default attempts per backend
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default time budget for a single backend attempt
pub const DEFAULT_PER_BACKEND_TIMEOUT_MS: u64 = 2000;

/// Failures in a row before a sticky metadata endpoint is demoted
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Retry policy for backend attempts
///
/// The config file's `retry` section only sets timing. The attempt budget
/// comes from each policy entry's `max-retries`, so `max-attempts` is not
/// accepted there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct RetryPolicy {
    /// Maximum number of attempts (the first try counts)
    #[serde(skip, default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Retry strategy
    #[serde(default)]
    pub strategy: RetryStrategy,

    /// Backoff multiplier for exponential strategies
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Add up to 25% random delay. Off by default so delays never decrease.
    #[serde(default)]
    pub jitter: bool,
}

impl RetryPolicy {
    /// Same timing with a different attempt budget
    pub fn with_max_attempts(&self, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..self.clone()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            strategy: RetryStrategy::default(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            jitter: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_initial_delay() -> u64 {
    100
}
fn default_max_delay() -> u64 {
    5000
}

/// Retry strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RetryStrategy {
    /// No delay between attempts
    None,

    /// Fixed delay between retries
    FixedDelay,

    /// Exponential backoff (default)
    #[default]
    ExponentialBackoff,

    /// Linear backoff
    LinearBackoff,
}

/// One row of the resolution table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PolicyEntry {
    pub kind: Kind,

    /// Backends tried top to bottom; first success wins
    pub backends: Vec<BackendId>,

    #[serde(default = "default_per_backend_timeout")]
    pub per_backend_timeout_ms: u64,

    /// Attempts per backend for Timeout/Unavailable failures
    #[serde(default = "default_max_attempts")]
    pub max_retries: u32,

    /// Cache TTL; falls back to the kind's default when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

fn default_per_backend_timeout() -> u64 {
    DEFAULT_PER_BACKEND_TIMEOUT_MS
}

impl PolicyEntry {
    /// Entry with default timing for `kind`
    pub fn new(kind: Kind, backends: Vec<BackendId>) -> Self {
        Self {
            kind,
            backends,
            per_backend_timeout_ms: DEFAULT_PER_BACKEND_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            ttl_secs: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_backend_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_secs = Some(ttl.as_secs());
        self
    }

    pub fn per_backend_timeout(&self) -> Duration {
        Duration::from_millis(self.per_backend_timeout_ms)
    }

    /// Effective TTL for values resolved under this entry
    pub fn ttl(&self) -> Option<Duration> {
        match self.ttl_secs {
            Some(secs) => Some(Duration::from_secs(secs)),
            None => self.kind.default_ttl(),
        }
    }

    fn validate(&self, known: &HashSet<&BackendId>) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::EmptyPolicy { kind: self.kind });
        }
        if self.max_retries == 0 {
            return Err(Error::InvalidRetries { kind: self.kind });
        }

        let mut seen = HashSet::new();
        for backend in &self.backends {
            if !seen.insert(backend) {
                return Err(Error::duplicate_backend(self.kind, backend.clone()));
            }
            if !known.contains(backend) {
                return Err(Error::unknown_backend(self.kind, backend.clone()));
            }
        }
        Ok(())
    }
}

/// Validated, read-only resolution table covering every kind
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionPolicy {
    secret: PolicyEntry,
    config: PolicyEntry,
    metadata: PolicyEntry,
}

impl ResolutionPolicy {
    /// Build the table, checking every kind has exactly one well-formed entry
    /// that only references `known` backends.
    pub fn new(entries: Vec<PolicyEntry>, known: &[BackendId]) -> Result<Self> {
        let known: HashSet<&BackendId> = known.iter().collect();

        let mut secret = None;
        let mut config = None;
        let mut metadata = None;

        for entry in entries {
            entry.validate(&known)?;
            let slot = match entry.kind {
                Kind::Secret => &mut secret,
                Kind::Config => &mut config,
                Kind::Metadata => &mut metadata,
            };
            if slot.is_some() {
                return Err(Error::DuplicatePolicy { kind: entry.kind });
            }
            *slot = Some(entry);
        }

        Ok(Self {
            secret: secret.ok_or(Error::MissingPolicy { kind: Kind::Secret })?,
            config: config.ok_or(Error::MissingPolicy { kind: Kind::Config })?,
            metadata: metadata.ok_or(Error::MissingPolicy {
                kind: Kind::Metadata,
            })?,
        })
    }

    /// Entry for `kind`. Total: validation guarantees every kind is present.
    pub fn entry(&self, kind: Kind) -> &PolicyEntry {
        match kind {
            Kind::Secret => &self.secret,
            Kind::Config => &self.config,
            Kind::Metadata => &self.metadata,
        }
    }

    /// Entries in `Kind::ALL` order
    pub fn entries(&self) -> impl Iterator<Item = &PolicyEntry> {
        Kind::ALL.into_iter().map(move |kind| self.entry(kind))
    }

    /// Every backend id referenced by any entry
    pub fn referenced_backends(&self) -> HashSet<&BackendId> {
        self.entries().flat_map(|e| e.backends.iter()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<BackendId> {
        names.iter().map(|n| BackendId::from(*n)).collect()
    }

    fn full_table() -> Vec<PolicyEntry> {
        vec![
            PolicyEntry::new(Kind::Secret, ids(&["env", "vault:hcom"])),
            PolicyEntry::new(Kind::Config, ids(&["env", "local"])),
            PolicyEntry::new(Kind::Metadata, ids(&["metadata"])),
        ]
    }

    #[test]
    fn test_valid_policy() {
        let known = ids(&["env", "local", "vault:hcom", "metadata"]);
        let policy = ResolutionPolicy::new(full_table(), &known).unwrap();

        assert_eq!(policy.entry(Kind::Secret).backends, ids(&["env", "vault:hcom"]));
        assert_eq!(policy.entries().count(), 3);
        assert_eq!(policy.referenced_backends().len(), 4);
    }

    #[test]
    fn test_missing_kind_rejected() {
        let known = ids(&["env", "local", "vault:hcom", "metadata"]);
        let mut entries = full_table();
        entries.pop();

        let err = ResolutionPolicy::new(entries, &known).unwrap_err();
        assert!(matches!(err, Error::MissingPolicy { kind: Kind::Metadata }));
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let known = ids(&["env", "local", "metadata"]);
        let mut entries = full_table();
        entries[0] = PolicyEntry::new(Kind::Secret, ids(&["env", "env"]));

        let err = ResolutionPolicy::new(entries, &known).unwrap_err();
        assert!(matches!(err, Error::DuplicateBackend { .. }));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let known = ids(&["env", "local", "metadata"]);
        let err = ResolutionPolicy::new(full_table(), &known).unwrap_err();
        assert!(matches!(
            err,
            Error::UnknownBackend { kind: Kind::Secret, .. }
        ));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let known = ids(&["env", "local", "vault:hcom", "metadata"]);
        let mut entries = full_table();
        entries[1] = entries[1].clone().with_max_retries(0);

        let err = ResolutionPolicy::new(entries, &known).unwrap_err();
        assert!(matches!(err, Error::InvalidRetries { kind: Kind::Config }));
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let known = ids(&["env", "local", "vault:hcom", "metadata"]);
        let mut entries = full_table();
        entries.push(PolicyEntry::new(Kind::Secret, ids(&["env"])));

        let err = ResolutionPolicy::new(entries, &known).unwrap_err();
        assert!(matches!(err, Error::DuplicatePolicy { kind: Kind::Secret }));
    }

    #[test]
    fn test_ttl_defaults_per_kind() {
        let secret = PolicyEntry::new(Kind::Secret, ids(&["env"]));
        assert_eq!(secret.ttl(), Some(Duration::from_secs(300)));

        let config = PolicyEntry::new(Kind::Config, ids(&["env"]));
        assert_eq!(config.ttl(), Some(Duration::from_secs(900)));

        let metadata = PolicyEntry::new(Kind::Metadata, ids(&["metadata"]));
        assert_eq!(metadata.ttl(), None);

        let pinned = metadata.with_ttl(Duration::from_secs(30));
        assert_eq!(pinned.ttl(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_entry_yaml_defaults() {
        let entry: PolicyEntry = serde_yaml_ng::from_str("kind: config\nbackends: [env, local]\n").unwrap();
        assert_eq!(entry.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(entry.per_backend_timeout_ms, DEFAULT_PER_BACKEND_TIMEOUT_MS);
        assert_eq!(entry.ttl_secs, None);
    }

    #[test]
    fn test_unknown_kind_in_yaml_is_an_error() {
        let result: std::result::Result<PolicyEntry, _> =
            serde_yaml_ng::from_str("kind: credentials\nbackends: [env]\n");
        assert!(result.is_err());
    }
}
