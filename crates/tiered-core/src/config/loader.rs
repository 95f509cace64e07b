//! Configuration file discovery, parsing and validation
//!
//! Lookup order:
//! 1. An explicit path (`--config`)
//! 2. `TIERED_CONFIG`
//! 3. `tiered.yaml` / `tiered.yml` in the current directory
//! 4. `~/.config/tiered/tiered.yaml`
//! 5. Built-in defaults
//!
//! `TIERED_*` environment variables are applied on top of whichever file
//! was found.

use super::schema::{Settings, TieredConfigFile};
use crate::error::{Error, Result};
use crate::policy::{ResolutionPolicy, RetryPolicy};
use crate::types::BackendId;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::env;
use std::fs;

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "TIERED_CONFIG";

/// Configuration file names to search for
const CONFIG_FILE_NAMES: &[&str] = &["tiered.yaml", "tiered.yml"];

const EMBEDDED_DEFAULTS: &str = include_str!("../../defaults/tiered-defaults.yaml");

/// Loaded and validated configuration
#[derive(Debug, Clone)]
pub struct TieredConfig {
    /// The parsed configuration
    pub config: TieredConfigFile,

    /// Path of the file it came from; `None` for built-in defaults
    pub config_path: Option<Utf8PathBuf>,

    policy: ResolutionPolicy,
}

impl TieredConfig {
    /// Load configuration from the specified path or search for it
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let explicit = path
            .map(Utf8Path::to_owned)
            .or_else(|| env::var(CONFIG_ENV_VAR).ok().map(Utf8PathBuf::from));

        let found = match explicit {
            Some(p) => {
                let content = fs::read_to_string(&p).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::NotFound {
                        Error::config_not_found(p.as_str())
                    } else {
                        Error::Io(e)
                    }
                })?;
                Some((p, content))
            }
            None => Self::find_config()?,
        };

        let mut config = match found {
            Some((config_path, content)) => {
                tracing::debug!("Loading configuration from {}", config_path);
                let base_dir = config_path
                    .parent()
                    .map(|p| p.to_owned())
                    .unwrap_or_else(|| Utf8PathBuf::from("."));
                let mut config = Self::parse(&content, &base_dir)?;
                config.config_path = Some(config_path);
                config
            }
            None => {
                tracing::debug!("No configuration file found, using built-in defaults");
                Self::defaults()?
            }
        };

        apply_env_overrides(&mut config.config.settings, &mut config.config.retry)?;
        Ok(config)
    }

    /// Parse configuration text; relative file paths resolve against `base_dir`
    pub fn from_yaml(content: &str, base_dir: &Utf8Path) -> Result<Self> {
        Self::parse(content, base_dir)
    }

    /// The built-in defaults
    pub fn defaults() -> Result<Self> {
        Self::parse(EMBEDDED_DEFAULTS, Utf8Path::new("."))
    }

    fn parse(content: &str, base_dir: &Utf8Path) -> Result<Self> {
        let mut file: TieredConfigFile = serde_yaml_ng::from_str(content)?;

        if file.backends.is_empty() && file.policy.is_empty() {
            let defaults: TieredConfigFile = serde_yaml_ng::from_str(EMBEDDED_DEFAULTS)?;
            file.backends = defaults.backends;
            file.policy = defaults.policy;
        }

        for backend in &mut file.backends {
            backend.resolve_paths(base_dir);
        }

        Self::validated(file)
    }

    fn validated(file: TieredConfigFile) -> Result<Self> {
        validate_settings(&file.settings)?;
        if file.retry.jitter {
            return Err(Error::invalid_config(
                "retry.jitter is not supported: backoff delays must never decrease",
            ));
        }

        let mut seen = HashSet::new();
        for backend in &file.backends {
            if !seen.insert(&backend.id) {
                return Err(Error::DuplicateBackendDefinition {
                    backend: backend.id.clone(),
                });
            }
            backend.validate()?;
        }

        let known: Vec<BackendId> = file.backends.iter().map(|b| b.id.clone()).collect();
        let policy = ResolutionPolicy::new(file.policy.clone(), &known)?;

        for backend in &file.backends {
            if !policy.referenced_backends().contains(&backend.id) {
                tracing::warn!("Backend '{}' is defined but not used by any kind", backend.id);
            }
        }

        Ok(Self {
            config: file,
            config_path: None,
            policy,
        })
    }

    /// Search the current directory, then the user config directory
    fn find_config() -> Result<Option<(Utf8PathBuf, String)>> {
        let mut candidates: Vec<Utf8PathBuf> =
            CONFIG_FILE_NAMES.iter().map(Utf8PathBuf::from).collect();

        if let Some(dir) = dirs::config_dir().and_then(|d| Utf8PathBuf::try_from(d).ok()) {
            candidates.push(dir.join("tiered").join("tiered.yaml"));
        }

        for path in candidates {
            if path.exists() {
                let content = fs::read_to_string(&path)?;
                return Ok(Some((path, content)));
            }
        }
        Ok(None)
    }

    /// The validated resolution table
    pub fn policy(&self) -> &ResolutionPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &Settings {
        &self.config.settings
    }

    /// Backoff timing shared by every backend
    pub fn retry(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Where the configuration came from, for display
    pub fn source(&self) -> String {
        match &self.config_path {
            Some(path) => path.to_string(),
            None => "built-in defaults".to_string(),
        }
    }
}

fn validate_settings(settings: &Settings) -> Result<()> {
    if settings.max_concurrent_fetches == 0 {
        return Err(Error::invalid_config("max-concurrent-fetches must be at least 1"));
    }
    if settings.consecutive_failure_threshold == 0 {
        return Err(Error::invalid_config(
            "consecutive-failure-threshold must be at least 1",
        ));
    }
    Ok(())
}

fn env_number<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(val) => val
            .parse()
            .map(Some)
            .map_err(|_| Error::invalid_config(format!("{} must be a valid number", name))),
        Err(_) => Ok(None),
    }
}

/// Apply `TIERED_*` environment overrides
fn apply_env_overrides(settings: &mut Settings, retry: &mut RetryPolicy) -> Result<()> {
    if let Some(val) = env_number("TIERED_MAX_CONCURRENT_FETCHES")? {
        settings.max_concurrent_fetches = val;
    }
    if let Some(val) = env_number("TIERED_FAILURE_THRESHOLD")? {
        settings.consecutive_failure_threshold = val;
    }
    if let Some(val) = env_number("TIERED_RETRY_INITIAL_DELAY_MS")? {
        retry.initial_delay_ms = val;
    }
    if let Some(val) = env_number("TIERED_RETRY_MAX_DELAY_MS")? {
        retry.max_delay_ms = val;
    }
    validate_settings(settings)
}
