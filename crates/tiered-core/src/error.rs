//! Error types for tiered-core

use crate::types::{BackendId, Kind};
use thiserror::Error;

/// Result type alias using tiered-core's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors. All of these are fatal at startup.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Invalid configuration format
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml_ng::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A kind name that is not secret, config or metadata
    #[error("Unknown kind: {kind}. Valid kinds: secret, config, metadata")]
    UnknownKind { kind: String },

    /// A kind has no policy entry
    #[error("No resolution policy for kind '{kind}'")]
    MissingPolicy { kind: Kind },

    /// A kind has more than one policy entry
    #[error("Resolution policy for kind '{kind}' is declared more than once")]
    DuplicatePolicy { kind: Kind },

    /// A policy entry lists no backends
    #[error("Resolution policy for kind '{kind}' has no backends")]
    EmptyPolicy { kind: Kind },

    /// A backend appears twice in one entry, so the ordering is not total
    #[error("Backend '{backend}' is listed more than once for kind '{kind}'")]
    DuplicateBackend { kind: Kind, backend: BackendId },

    /// A policy entry references a backend that is not defined
    #[error("Backend '{backend}' referenced by kind '{kind}' is not defined")]
    UnknownBackend { kind: Kind, backend: BackendId },

    /// Two backend definitions share an id
    #[error("Backend '{backend}' is defined more than once")]
    DuplicateBackendDefinition { backend: BackendId },

    /// max-retries must allow at least one attempt
    #[error("max-retries for kind '{kind}' must be at least 1")]
    InvalidRetries { kind: Kind },
}

impl Error {
    /// Create a config not found error
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    /// Create an invalid config error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an unknown kind error
    pub fn unknown_kind(kind: impl Into<String>) -> Self {
        Self::UnknownKind { kind: kind.into() }
    }

    /// Create an unknown backend error
    pub fn unknown_backend(kind: Kind, backend: BackendId) -> Self {
        Self::UnknownBackend { kind, backend }
    }

    /// Create a duplicate backend error
    pub fn duplicate_backend(kind: Kind, backend: BackendId) -> Self {
        Self::DuplicateBackend { kind, backend }
    }
}
