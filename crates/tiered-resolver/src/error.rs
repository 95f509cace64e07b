//! Backend and resolution errors

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tiered_core::{BackendId, Key, Kind};

/// Why a backend could not produce a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendErrorKind {
    /// The backend answered: this key is not here
    NotFound,
    /// The attempt ran past its time budget
    Timeout,
    /// The backend answered: access denied
    Unauthorized,
    /// The backend could not be reached or failed transiently
    Unavailable,
}

impl BackendErrorKind {
    /// Only transient failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendErrorKind::Timeout | BackendErrorKind::Unavailable)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::NotFound => "not-found",
            BackendErrorKind::Timeout => "timeout",
            BackendErrorKind::Unauthorized => "unauthorized",
            BackendErrorKind::Unavailable => "unavailable",
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single backend attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unauthorized, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unavailable, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Last outcome of one backend during a resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    pub backend: BackendId,
    pub kind: BackendErrorKind,
    /// Attempts actually made; zero when the deadline had already passed
    pub attempts: u32,
    pub message: String,
}

/// Every backend's failure for one key, in policy order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregatedFailure {
    pub key: Key,
    pub kind: Kind,
    pub failures: Vec<BackendFailure>,
}

impl AggregatedFailure {
    /// No backend has the key
    pub fn all_not_found(&self) -> bool {
        self.all(BackendErrorKind::NotFound)
    }

    /// Every backend refused access
    pub fn all_unauthorized(&self) -> bool {
        self.all(BackendErrorKind::Unauthorized)
    }

    fn all(&self, kind: BackendErrorKind) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(|f| f.kind == kind)
    }
}

impl fmt::Display for AggregatedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no backend resolved {} '{}'", self.kind, self.key)?;
        for failure in &self.failures {
            write!(
                f,
                "; {} {} after {} attempt(s): {}",
                failure.backend, failure.kind, failure.attempts, failure.message
            )?;
        }
        Ok(())
    }
}

/// Errors surfaced to callers of the resolver
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// Every backend in the policy failed
    #[error("{0}")]
    Exhausted(AggregatedFailure),

    /// The key was first resolved as a different kind in this process
    #[error("Key '{key}' is a {recorded} key and cannot be resolved as {requested}")]
    KindConflict {
        key: Key,
        requested: Kind,
        recorded: Kind,
    },
}

impl ResolveError {
    /// The per-backend failures, when resolution was attempted
    pub fn aggregated(&self) -> Option<&AggregatedFailure> {
        match self {
            ResolveError::Exhausted(failure) => Some(failure),
            ResolveError::KindConflict { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(backend: &str, kind: BackendErrorKind) -> BackendFailure {
        BackendFailure {
            backend: BackendId::from(backend),
            kind,
            attempts: 1,
            message: "test".to_string(),
        }
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(BackendError::timeout("slow").is_retryable());
        assert!(BackendError::unavailable("503").is_retryable());
        assert!(!BackendError::not_found("missing").is_retryable());
        assert!(!BackendError::unauthorized("403").is_retryable());
    }

    #[test]
    fn test_all_not_found() {
        let agg = AggregatedFailure {
            key: Key::from("db.password"),
            kind: Kind::Secret,
            failures: vec![
                failure("env", BackendErrorKind::NotFound),
                failure("vault:hcom", BackendErrorKind::NotFound),
            ],
        };
        assert!(agg.all_not_found());
        assert!(!agg.all_unauthorized());

        let mixed = AggregatedFailure {
            failures: vec![
                failure("env", BackendErrorKind::NotFound),
                failure("vault:hcom", BackendErrorKind::Unauthorized),
            ],
            ..agg
        };
        assert!(!mixed.all_not_found());
        assert!(!mixed.all_unauthorized());
    }

    #[test]
    fn test_display_lists_backends_in_order() {
        let agg = AggregatedFailure {
            key: Key::from("region"),
            kind: Kind::Config,
            failures: vec![
                failure("env", BackendErrorKind::NotFound),
                failure("paramstore", BackendErrorKind::Timeout),
            ],
        };
        let text = ResolveError::Exhausted(agg).to_string();
        let env = text.find("env not-found").unwrap();
        let store = text.find("paramstore timeout").unwrap();
        assert!(env < store);
    }
}
